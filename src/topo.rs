//! UVC device topology.
//!
//! UVC devices consist of:
//! - *Input Terminals*, which provide video data to the UVC device.
//! - *Output Terminals*, which transfer video data away from the UVC device.
//! - *Units*, which connect between other units or terminals, and process or reroute video data.
//!
//! All of them are described by class-specific descriptors attached to the Video Control
//! interface, which [`VideoControlInterface`] collects.

pub(crate) mod parse;

use bitflags::bitflags;
use uuid::Uuid;

use crate::{descriptor::DescriptorHeader, util::BcdVersion};

/// The `VC_HEADER` descriptor.
#[derive(Debug, Clone)]
pub struct ControlHeader {
    pub(crate) header: DescriptorHeader,
    pub(crate) uvc_version: BcdVersion,
    pub(crate) total_length: u16,
    pub(crate) clock_frequency: u32,
    pub(crate) interface_numbers: Vec<u8>,
    pub(crate) in_collection: u8,
    pub(crate) valid: bool,
}

impl ControlHeader {
    pub fn header(&self) -> DescriptorHeader {
        self.header
    }

    /// `bcdUVC`, the version of the UVC specification the device implements.
    pub fn uvc_version(&self) -> BcdVersion {
        self.uvc_version
    }

    /// `wTotalLength` of all class-specific VC descriptors.
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    /// `dwClockFrequency` in Hz (deprecated by UVC 1.5, but still widely reported).
    pub fn clock_frequency(&self) -> u32 {
        self.clock_frequency
    }

    /// `bInCollection`, the number of streaming interfaces belonging to this function.
    pub fn in_collection(&self) -> u8 {
        self.in_collection
    }

    /// `baInterfaceNr`.
    pub fn interface_numbers(&self) -> &[u8] {
        &self.interface_numbers
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone)]
pub struct InputTerminalDesc {
    pub(crate) header: DescriptorHeader,
    pub(crate) terminal_id: u8,
    pub(crate) terminal_type: u16,
    pub(crate) assoc_terminal: u8,
    pub(crate) terminal_string: u8,
    pub(crate) camera: Option<CameraTerminalDesc>,
    pub(crate) valid: bool,
}

impl InputTerminalDesc {
    pub fn terminal_id(&self) -> u8 {
        self.terminal_id
    }

    pub fn raw_terminal_type(&self) -> u16 {
        self.terminal_type
    }

    pub fn terminal_type(&self) -> Option<InputTerminalType> {
        InputTerminalType::from_raw(self.terminal_type)
    }

    pub fn assoc_terminal(&self) -> u8 {
        self.assoc_terminal
    }

    pub fn terminal_string(&self) -> u8 {
        self.terminal_string
    }

    /// Returns the camera-specific part of the descriptor, if this is a camera terminal.
    pub fn as_camera(&self) -> Option<&CameraTerminalDesc> {
        self.camera.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone)]
pub struct CameraTerminalDesc {
    pub(crate) objective_focal_length_min: u16,
    pub(crate) objective_focal_length_max: u16,
    pub(crate) ocular_focal_length: u16,
    pub(crate) control_size: u8,
    pub(crate) controls: CameraControls,
}

impl CameraTerminalDesc {
    pub fn objective_focal_length_min(&self) -> u16 {
        self.objective_focal_length_min
    }

    pub fn objective_focal_length_max(&self) -> u16 {
        self.objective_focal_length_max
    }

    pub fn ocular_focal_length(&self) -> u16 {
        self.ocular_focal_length
    }

    pub fn control_size(&self) -> u8 {
        self.control_size
    }

    pub fn controls(&self) -> CameraControls {
        self.controls
    }
}

#[derive(Debug, Clone)]
pub struct OutputTerminalDesc {
    pub(crate) header: DescriptorHeader,
    pub(crate) terminal_id: u8,
    pub(crate) terminal_type: u16,
    pub(crate) assoc_terminal: u8,
    pub(crate) source_id: u8,
    pub(crate) terminal_string: u8,
    pub(crate) valid: bool,
}

impl OutputTerminalDesc {
    pub fn terminal_id(&self) -> u8 {
        self.terminal_id
    }

    pub fn terminal_type(&self) -> Option<OutputTerminalType> {
        OutputTerminalType::from_raw(self.terminal_type)
    }

    pub fn assoc_terminal(&self) -> u8 {
        self.assoc_terminal
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn terminal_string(&self) -> u8 {
        self.terminal_string
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone)]
pub struct SelectorUnitDesc {
    pub(crate) header: DescriptorHeader,
    pub(crate) unit_id: u8,
    pub(crate) source_ids: Vec<u8>,
    pub(crate) selector_string: u8,
    pub(crate) valid: bool,
}

impl SelectorUnitDesc {
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// `baSourceID`, one entry per input pin.
    pub fn source_ids(&self) -> &[u8] {
        &self.source_ids
    }

    pub fn selector_string(&self) -> u8 {
        self.selector_string
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingUnitDesc {
    pub(crate) header: DescriptorHeader,
    pub(crate) unit_id: u8,
    pub(crate) source_id: u8,
    pub(crate) max_multiplier: u16,
    pub(crate) control_size: u8,
    pub(crate) controls: ProcessingUnitControls,
    pub(crate) processing_string: u8,
    /// Only present from UVC 1.1 on.
    pub(crate) video_standards: Option<VideoStandards>,
    pub(crate) valid: bool,
}

impl ProcessingUnitDesc {
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn max_multiplier(&self) -> u16 {
        self.max_multiplier
    }

    /// Size of the `bmControls` bitmap in bytes.
    pub fn control_size(&self) -> u8 {
        self.control_size
    }

    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }

    pub fn processing_string(&self) -> u8 {
        self.processing_string
    }

    pub fn video_standards(&self) -> Option<VideoStandards> {
        self.video_standards
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

bitflags! {
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

bitflags! {
    pub struct VideoStandards: u8 {
        const NONE         = 1 << 0;
        const NTSC_525_60  = 1 << 1;
        const PAL_625_50   = 1 << 2;
        const SECAM_625_50 = 1 << 3;
        const NTSC_625_50  = 1 << 4;
        const PAL_525_60   = 1 << 5;
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionUnitDesc {
    pub(crate) header: DescriptorHeader,
    pub(crate) unit_id: u8,
    pub(crate) extension_code: Uuid,
    pub(crate) num_controls: u8,
    pub(crate) source_ids: Vec<u8>,
    pub(crate) controls: Vec<u8>,
    pub(crate) extension_string: u8,
    pub(crate) valid: bool,
}

impl ExtensionUnitDesc {
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// `guidExtensionCode`, the vendor-specific identifier of this extension unit.
    pub fn extension_code(&self) -> Uuid {
        self.extension_code
    }

    pub fn num_controls(&self) -> u8 {
        self.num_controls
    }

    pub fn source_ids(&self) -> &[u8] {
        &self.source_ids
    }

    /// `bmControls`, left as raw bytes since its meaning is vendor-defined.
    pub fn controls(&self) -> &[u8] {
        &self.controls
    }

    pub fn extension_string(&self) -> u8 {
        self.extension_string
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

bitflags! {
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

primitive_enum! {
    pub enum InputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        InVendorSpecific = 0x0200,
        InCamera = 0x0201,
        InMediaTransport = 0x0202,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

primitive_enum! {
    pub enum OutputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        OutVendorSpecific = 0x0300,
        OutDisplay = 0x0301,
        OutMediaTransport = 0x0302,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

/// Any class-specific descriptor found on a Video Control interface.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VcDescriptor {
    Header(ControlHeader),
    InputTerminal(InputTerminalDesc),
    OutputTerminal(OutputTerminalDesc),
    SelectorUnit(SelectorUnitDesc),
    ProcessingUnit(ProcessingUnitDesc),
    ExtensionUnit(ExtensionUnitDesc),
    /// A subtype this crate does not decode (eg. an encoding unit).
    Unsupported(DescriptorHeader),
}

impl VcDescriptor {
    pub fn header(&self) -> DescriptorHeader {
        match self {
            VcDescriptor::Header(d) => d.header,
            VcDescriptor::InputTerminal(d) => d.header,
            VcDescriptor::OutputTerminal(d) => d.header,
            VcDescriptor::SelectorUnit(d) => d.header,
            VcDescriptor::ProcessingUnit(d) => d.header,
            VcDescriptor::ExtensionUnit(d) => d.header,
            VcDescriptor::Unsupported(header) => *header,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            VcDescriptor::Header(d) => d.is_valid(),
            VcDescriptor::InputTerminal(d) => d.is_valid(),
            VcDescriptor::OutputTerminal(d) => d.is_valid(),
            VcDescriptor::SelectorUnit(d) => d.is_valid(),
            VcDescriptor::ProcessingUnit(d) => d.is_valid(),
            VcDescriptor::ExtensionUnit(d) => d.is_valid(),
            VcDescriptor::Unsupported(_) => false,
        }
    }
}

/// The parsed Video Control interface: the device's topology plus the interface's own resources.
#[derive(Debug, Clone)]
pub struct VideoControlInterface {
    pub(crate) interface_number: u8,
    pub(crate) interrupt_endpoint: Option<u8>,
    pub(crate) header: Option<ControlHeader>,
    pub(crate) input_terminals: Vec<InputTerminalDesc>,
    pub(crate) output_terminals: Vec<OutputTerminalDesc>,
    pub(crate) selector_units: Vec<SelectorUnitDesc>,
    pub(crate) processing_units: Vec<ProcessingUnitDesc>,
    pub(crate) extension_units: Vec<ExtensionUnitDesc>,
    pub(crate) valid: bool,
}

impl VideoControlInterface {
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    /// Interrupt endpoint of the Video Control interface. Optional.
    pub fn interrupt_endpoint(&self) -> Option<u8> {
        self.interrupt_endpoint
    }

    pub fn header(&self) -> Option<&ControlHeader> {
        self.header.as_ref()
    }

    /// The UVC version declared by the `VC_HEADER`, or 0.0 if there is none.
    pub fn uvc_version(&self) -> BcdVersion {
        self.header
            .as_ref()
            .map_or(BcdVersion::default(), |h| h.uvc_version)
    }

    /// The device clock frequency declared by the `VC_HEADER`, 0 if unknown.
    pub fn clock_frequency(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.clock_frequency)
    }

    pub fn input_terminals(&self) -> &[InputTerminalDesc] {
        &self.input_terminals
    }

    pub fn camera_terminals(&self) -> impl Iterator<Item = &InputTerminalDesc> + '_ {
        self.input_terminals
            .iter()
            .filter(|term| term.as_camera().is_some())
    }

    pub fn output_terminals(&self) -> &[OutputTerminalDesc] {
        &self.output_terminals
    }

    pub fn selector_units(&self) -> &[SelectorUnitDesc] {
        &self.selector_units
    }

    pub fn processing_units(&self) -> &[ProcessingUnitDesc] {
        &self.processing_units
    }

    pub fn extension_units(&self) -> &[ExtensionUnitDesc] {
        &self.extension_units
    }

    /// Whether a valid `VC_HEADER` was found and parsing did not hit a duplicate header.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
