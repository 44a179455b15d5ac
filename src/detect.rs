use crate::{
    error::*,
    streaming_interface::VideoStreamingInterface,
    topo::VideoControlInterface,
    transport::InterfaceInfo,
    Result,
};

const UVC_INTERF_CLASS: u8 = 0x0E;
const UVC_INTERF_SUBCLASS_CONTROL: u8 = 1;
const UVC_INTERF_SUBCLASS_STREAMING: u8 = 2;

/// Finds and parses the Video Control interface and the first Video Streaming interface (with all
/// of its alternate settings) in a configuration snapshot.
pub(crate) fn classify_interfaces(
    interfaces: &[InterfaceInfo],
) -> Result<(VideoControlInterface, VideoStreamingInterface)> {
    let mut control_interface: Option<VideoControlInterface> = None;
    let mut streaming_interface = VideoStreamingInterface::new();

    for intf in interfaces {
        if intf.class != UVC_INTERF_CLASS {
            log::trace!(
                "skipping interface {} with class {:#04x}",
                intf.number,
                intf.class
            );
            continue;
        }

        match intf.subclass {
            UVC_INTERF_SUBCLASS_CONTROL => {
                if let Some(existing) = &control_interface {
                    if existing.interface_number() != intf.number {
                        return err(
                            "device lists more than one control interface",
                            Action::EnumeratingInterfaces,
                        );
                    }
                    log::debug!(
                        "ignoring alternate setting {} of the control interface",
                        intf.alt_setting
                    );
                    continue;
                }
                control_interface = Some(VideoControlInterface::parse(intf));
            }
            UVC_INTERF_SUBCLASS_STREAMING => match streaming_interface.interface_number() {
                Some(number) if number != intf.number => {
                    log::debug!(
                        "ignoring additional streaming interface {}",
                        intf.number
                    );
                }
                _ => {
                    if let Err(e) = streaming_interface.parse_additional_interface(intf) {
                        log::error!("streaming interface {}: {}", intf.number, e);
                    }
                }
            },
            e => {
                log::warn!(
                    "interface {} uses unexpected subclass code {}, ignoring it",
                    intf.number,
                    e
                );
            }
        }
    }

    let control_interface = match control_interface {
        Some(intf) => intf,
        None => {
            return err(
                "device does not have a UVC control interface",
                Action::EnumeratingInterfaces,
            )
        }
    };

    if streaming_interface.interface_number().is_none() {
        return err(
            "device does not have a UVC streaming interface",
            Action::EnumeratingInterfaces,
        );
    }

    Ok((control_interface, streaming_interface))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{descriptor::CS_INTERFACE, format::parse::tests::*};

    fn interface(number: u8, alt_setting: u8, subclass: u8, extra: Vec<u8>) -> InterfaceInfo {
        InterfaceInfo {
            number,
            alt_setting,
            class: UVC_INTERF_CLASS,
            subclass,
            protocol: 0,
            extra,
            endpoints: Vec::new(),
        }
    }

    fn vc_header() -> Vec<u8> {
        vec![13, CS_INTERFACE, 1, 0x10, 0x01, 13, 0, 0x80, 0x8D, 0x5B, 0x00, 1, 1]
    }

    #[test]
    fn finds_both_interfaces() {
        let mut vs = input_header(0x81, 1);
        vs.extend(mjpeg_format(1, 0));
        let interfaces = vec![
            interface(0, 0, UVC_INTERF_SUBCLASS_CONTROL, vc_header()),
            interface(1, 0, UVC_INTERF_SUBCLASS_STREAMING, vs),
            interface(1, 1, UVC_INTERF_SUBCLASS_STREAMING, Vec::new()),
            InterfaceInfo {
                class: 0x01,
                ..interface(2, 0, 1, Vec::new())
            },
        ];

        let (vc, vs) = classify_interfaces(&interfaces).unwrap();
        assert_eq!(vc.interface_number(), 0);
        assert!(vc.is_valid());
        assert_eq!(vc.clock_frequency(), 6_000_000);
        assert_eq!(vs.interface_number(), Some(1));
        assert_eq!(vs.alternate_settings().len(), 2);
        assert!(vs.is_valid());
    }

    #[test]
    fn missing_interfaces_are_errors() {
        let only_control = vec![interface(0, 0, UVC_INTERF_SUBCLASS_CONTROL, vc_header())];
        assert!(classify_interfaces(&only_control).is_err());

        let only_streaming = vec![interface(1, 0, UVC_INTERF_SUBCLASS_STREAMING, Vec::new())];
        assert!(classify_interfaces(&only_streaming).is_err());
    }

    #[test]
    fn second_streaming_interface_is_ignored() {
        let interfaces = vec![
            interface(0, 0, UVC_INTERF_SUBCLASS_CONTROL, vc_header()),
            interface(1, 0, UVC_INTERF_SUBCLASS_STREAMING, input_header(0x81, 0)),
            interface(2, 0, UVC_INTERF_SUBCLASS_STREAMING, input_header(0x82, 0)),
        ];
        let (_, vs) = classify_interfaces(&interfaces).unwrap();
        assert_eq!(vs.endpoint_address(), Some(0x81));
    }
}
