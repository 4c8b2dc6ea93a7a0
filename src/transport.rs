use thiserror::Error;

use crate::hid::command::ErrorCode;

/// Failures of the link to the authenticator, as opposed to CTAP status errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error during transport: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    OtherError(#[from] anyhow::Error),

    #[error("Device answered with CTAPHID error 0x{0:02x}")]
    HidError(u8),

    #[error("Unexpected CTAPHID frame with command 0x{0:02x}")]
    UnexpectedFrame(u8),

    #[error("Smartcard answered with status word {0:04X}")]
    ApduStatus(u16),

    #[error("Received an empty response")]
    EmptyResponse,

    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// The typed CTAPHID error code, when this is a known HID error frame.
    pub fn hid_error_code(&self) -> Option<ErrorCode> {
        match self {
            TransportError::HidError(code) => ErrorCode::try_from(*code).ok(),
            _ => None,
        }
    }
}

/// Firmware version reported by the device, `0.0.0` when it cannot be discovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, build: u8) -> Self {
        Version { major, minor, build }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}
