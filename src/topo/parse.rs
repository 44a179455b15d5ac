use crate::{
    descriptor::*,
    transport::{InterfaceInfo, TransferType},
    util::{split_descriptors, BcdVersion, DescReader},
};

use super::*;

impl ControlHeader {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let uvc_version = BcdVersion(r.u16());
        let total_length = r.u16();
        let clock_frequency = r.u32();
        let in_collection = r.u8();
        let interface_numbers = r.bytes(usize::from(in_collection));

        let expected = 12 + usize::from(in_collection);
        let valid = check_layout(&header, raw.len(), expected, &[VC_HEADER], &r);

        Self {
            header,
            uvc_version,
            total_length,
            clock_frequency,
            interface_numbers,
            in_collection,
            valid,
        }
    }
}

impl InputTerminalDesc {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let terminal_id = r.u8();
        let terminal_type = r.u16();
        let assoc_terminal = r.u8();
        let terminal_string = r.u8();

        let mut expected = 8;
        let camera = if terminal_type == InputTerminalType::InCamera as u16 {
            let objective_focal_length_min = r.u16();
            let objective_focal_length_max = r.u16();
            let ocular_focal_length = r.u16();
            let control_size = r.u8();
            let controls = CameraControls::from_bits_truncate(r.bitmask(control_size));
            expected = 15 + usize::from(control_size);

            Some(CameraTerminalDesc {
                objective_focal_length_min,
                objective_focal_length_max,
                ocular_focal_length,
                control_size,
                controls,
            })
        } else {
            // Other terminal types may carry type-specific trailing data we don't decode.
            expected = expected.max(raw.len());
            None
        };

        let valid = check_layout(&header, raw.len(), expected, &[VC_INPUT_TERMINAL], &r);

        Self {
            header,
            terminal_id,
            terminal_type,
            assoc_terminal,
            terminal_string,
            camera,
            valid,
        }
    }
}

impl OutputTerminalDesc {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let terminal_id = r.u8();
        let terminal_type = r.u16();
        let assoc_terminal = r.u8();
        let source_id = r.u8();
        let terminal_string = r.u8();

        let valid = check_layout(&header, raw.len(), 9, &[VC_OUTPUT_TERMINAL], &r);

        Self {
            header,
            terminal_id,
            terminal_type,
            assoc_terminal,
            source_id,
            terminal_string,
            valid,
        }
    }
}

impl SelectorUnitDesc {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let unit_id = r.u8();
        let num_pins = r.u8();
        let source_ids = r.bytes(usize::from(num_pins));
        let selector_string = r.u8();

        let expected = 6 + usize::from(num_pins);
        let valid = check_layout(&header, raw.len(), expected, &[VC_SELECTOR_UNIT], &r);

        Self {
            header,
            unit_id,
            source_ids,
            selector_string,
            valid,
        }
    }
}

impl ProcessingUnitDesc {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let unit_id = r.u8();
        let source_id = r.u8();
        let max_multiplier = r.u16();
        let control_size = r.u8();
        let controls = ProcessingUnitControls::from_bits_truncate(r.bitmask(control_size));
        let processing_string = r.u8();

        // UVC 1.0 ends here, UVC 1.1 and later append `bmVideoStandards`.
        let short_len = 9 + usize::from(control_size);
        let (expected, video_standards) = if usize::from(header.length) > short_len {
            (
                short_len + 1,
                Some(VideoStandards::from_bits_truncate(r.u8())),
            )
        } else {
            (short_len, None)
        };

        let valid = check_layout(&header, raw.len(), expected, &[VC_PROCESSING_UNIT], &r);

        Self {
            header,
            unit_id,
            source_id,
            max_multiplier,
            control_size,
            controls,
            processing_string,
            video_standards,
            valid,
        }
    }
}

impl ExtensionUnitDesc {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let unit_id = r.u8();
        let extension_code = r.guid();
        let num_controls = r.u8();
        let num_pins = r.u8();
        let source_ids = r.bytes(usize::from(num_pins));
        let control_size = r.u8();
        let controls = r.bytes(usize::from(control_size));
        let extension_string = r.u8();

        let expected = 24 + usize::from(num_pins) + usize::from(control_size);
        let valid = check_layout(&header, raw.len(), expected, &[VC_EXTENSION_UNIT], &r);

        Self {
            header,
            unit_id,
            extension_code,
            num_controls,
            source_ids,
            controls,
            extension_string,
            valid,
        }
    }
}

impl VcDescriptor {
    /// Parses one class-specific Video Control descriptor, dispatching on its subtype.
    pub fn parse(raw: &[u8]) -> Self {
        let header = DescriptorHeader::peek(raw).unwrap_or_default();
        match header.descriptor_subtype {
            VC_HEADER => VcDescriptor::Header(ControlHeader::parse(raw)),
            VC_INPUT_TERMINAL => VcDescriptor::InputTerminal(InputTerminalDesc::parse(raw)),
            VC_OUTPUT_TERMINAL => VcDescriptor::OutputTerminal(OutputTerminalDesc::parse(raw)),
            VC_SELECTOR_UNIT => VcDescriptor::SelectorUnit(SelectorUnitDesc::parse(raw)),
            VC_PROCESSING_UNIT => VcDescriptor::ProcessingUnit(ProcessingUnitDesc::parse(raw)),
            VC_EXTENSION_UNIT => VcDescriptor::ExtensionUnit(ExtensionUnitDesc::parse(raw)),
            _ => VcDescriptor::Unsupported(header),
        }
    }
}

impl VideoControlInterface {
    /// Parses the class-specific descriptors of a Video Control interface.
    ///
    /// Parsing stops at the first malformed descriptor; everything before it is kept.
    pub fn parse(interface: &InterfaceInfo) -> Self {
        let mut this = Self {
            interface_number: interface.number,
            interrupt_endpoint: None,
            header: None,
            input_terminals: Vec::new(),
            output_terminals: Vec::new(),
            selector_units: Vec::new(),
            processing_units: Vec::new(),
            extension_units: Vec::new(),
            valid: false,
        };

        for ep in &interface.endpoints {
            if ep.transfer_type == TransferType::Interrupt && ep.is_in() {
                this.interrupt_endpoint = Some(ep.address);
            } else {
                log::warn!(
                    "control interface has {:?} endpoint {:#04x}, only interrupt EPs are allowed",
                    ep.transfer_type,
                    ep.address
                );
            }
        }

        let mut duplicate_header = false;
        for (ty, data) in split_descriptors(&interface.extra) {
            if ty != CS_INTERFACE {
                log::warn!(
                    "unexpected descriptor type {:#04x} in VC interface, stopping",
                    ty
                );
                break;
            }

            let desc = VcDescriptor::parse(data);
            if !desc.is_valid() {
                if let VcDescriptor::Unsupported(header) = desc {
                    log::debug!(
                        "skipping unsupported VC descriptor subtype {:#04x}",
                        header.descriptor_subtype
                    );
                    continue;
                }
                log::warn!("invalid VC descriptor {:02x?}, stopping", data);
                break;
            }

            match desc {
                VcDescriptor::Header(header) => {
                    if this.header.is_some() {
                        log::error!("duplicate VC_HEADER descriptor");
                        duplicate_header = true;
                        break;
                    }
                    this.header = Some(header);
                }
                VcDescriptor::InputTerminal(term) => this.input_terminals.push(term),
                VcDescriptor::OutputTerminal(term) => this.output_terminals.push(term),
                VcDescriptor::SelectorUnit(unit) => this.selector_units.push(unit),
                VcDescriptor::ProcessingUnit(unit) => this.processing_units.push(unit),
                VcDescriptor::ExtensionUnit(unit) => this.extension_units.push(unit),
                VcDescriptor::Unsupported(_) => {}
            }
        }

        this.valid = !duplicate_header && this.header.as_ref().map_or(false, |h| h.is_valid());
        if this.header.is_none() {
            log::error!(
                "missing VC_HEADER descriptor on interface {}",
                interface.number
            );
        }

        this
    }
}
