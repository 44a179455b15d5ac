use std::{fmt, io};

pub struct Error {
    action: Option<Action>,
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn with_action(kind: impl Into<ErrorKind>, action: Action) -> Self {
        Self {
            action: Some(action),
            kind: kind.into(),
        }
    }

    pub(crate) fn is_usb_timeout(&self) -> bool {
        matches!(&self.kind, ErrorKind::Rusb(rusb::Error::Timeout))
    }

    /// Returns the underlying USB error, if this error was caused by the USB stack.
    pub fn usb_error(&self) -> Option<rusb::Error> {
        match &self.kind {
            ErrorKind::Rusb(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.kind {
            ErrorKind::Rusb(e) => write!(f, "{}", e),
            ErrorKind::Io(e) => write!(f, "{}", e),
            ErrorKind::Other(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Self {
            action: None,
            kind: ErrorKind::Rusb(e),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Rusb(rusb::Error),
    Io(io::Error),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ErrorKind {
    fn from(v: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(v)
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}

impl From<&'_ str> for ErrorKind {
    fn from(s: &str) -> Self {
        Self::Other(s.into())
    }
}

impl From<rusb::Error> for ErrorKind {
    fn from(e: rusb::Error) -> Self {
        Self::Rusb(e)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Error> for ErrorKind {
    fn from(e: Error) -> Self {
        match e.action {
            Some(_) => Self::Other(Box::new(e)),
            None => e.kind,
        }
    }
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug)]
pub(crate) enum Action {
    OpeningDevice,
    EnumeratingInterfaces,
    ParsingDescriptors,
    ClaimingInterface,
    SelectingAlternateSetting,
    ReadingControl,
    WritingControl,
    StreamNegotiation,
    AllocatingTransfers,
    SubmittingTransfer,
    CancellingTransfer,
    StartingStream,
    StoppingStream,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::OpeningDevice => "opening the USB device",
            Action::EnumeratingInterfaces => "enumerating USB interfaces",
            Action::ParsingDescriptors => "parsing UVC descriptors",
            Action::ClaimingInterface => "claiming a USB interface",
            Action::SelectingAlternateSetting => "selecting an alternate setting",
            Action::ReadingControl => "reading a device control",
            Action::WritingControl => "writing a device control",
            Action::StreamNegotiation => "negotiating stream parameters",
            Action::AllocatingTransfers => "allocating USB transfers",
            Action::SubmittingTransfer => "submitting a USB transfer",
            Action::CancellingTransfer => "cancelling a USB transfer",
            Action::StartingStream => "starting the video stream",
            Action::StoppingStream => "stopping the video stream",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T, E> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T, E> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| Error::with_action(e, action))
    }
}

pub(crate) fn err<T>(err: impl Into<ErrorKind>, action: Action) -> Result<T, Error> {
    Err(Error::with_action(err, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_action() {
        let e = Error::with_action("clock frequency is 0", Action::StartingStream);
        assert_eq!(
            e.to_string(),
            "error while starting the video stream: clock frequency is 0"
        );
    }

    #[test]
    fn rusb_errors_keep_their_kind() {
        let res: Result<(), rusb::Error> = Err(rusb::Error::Timeout);
        let e = res.during(Action::ReadingControl).unwrap_err();
        assert!(e.is_usb_timeout());
        assert_eq!(e.usb_error(), Some(rusb::Error::Timeout));
    }

    #[test]
    fn rewrapping_an_unannotated_error_keeps_its_cause() {
        let inner = Error::from(rusb::Error::Pipe);
        let res: Result<(), Error> = Err(inner);
        let e = res.during(Action::WritingControl).unwrap_err();
        assert_eq!(e.usb_error(), Some(rusb::Error::Pipe));
    }
}
