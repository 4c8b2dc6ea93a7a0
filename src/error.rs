use std::fmt;

use thiserror::Error;

use crate::{
    bio::fingerprint::CaptureError, crypto::CryptoError, ctap::command::StatusCode,
    transport::TransportError,
};

/// Every failure the engine can surface to a caller.
#[derive(Error, Debug)]
pub enum Error {
    /// The connection to the authenticator failed, nothing was retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authenticator rejected the command with a non-zero status byte.
    #[error(transparent)]
    Ctap(#[from] CtapError),

    #[error("Malformed authenticator response: {0}")]
    BadResponse(String),

    #[error("Could not encode command: {0}")]
    Encoding(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    /// The arguments can't be expressed as a request to this authenticator.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not supported by the authenticator")]
    NotSupported(&'static str),

    #[error("Requested modality {requested} but the authenticator reports modality {reported}")]
    UnsupportedModality { requested: u8, reported: u8 },

    /// A fingerprint sample was rejected, the user should try again.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A U2F check-only request found a credential this authenticator already holds.
    #[error("Credential in the exclude list is already registered")]
    CredentialExcluded,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The CTAP status carried by this error, if the authenticator produced one.
    pub fn ctap_error(&self) -> Option<CtapError> {
        match self {
            Error::Ctap(err) => Some(*err),
            _ => None,
        }
    }

    /// The ISO 7816 status word of a rejected APDU.
    pub fn status_word(&self) -> Option<u16> {
        match self {
            Error::Transport(TransportError::ApduStatus(sw)) => Some(*sw),
            _ => None,
        }
    }

    pub(crate) fn bad_response(reason: impl Into<String>) -> Self {
        Error::BadResponse(reason.into())
    }
}

/// A non-success status byte returned by the authenticator.
///
/// The raw byte is always kept since vendors are free to use codes that
/// [`StatusCode`] does not know about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtapError {
    code: u8,
}

impl CtapError {
    pub fn new(code: u8) -> Self {
        CtapError { code }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::try_from(self.code).ok()
    }

    pub fn is(&self, status: StatusCode) -> bool {
        self.code == u8::from(status)
    }

    pub fn is_pin_invalid(&self) -> bool {
        self.is(StatusCode::Ctap2ErrPinInvalid)
    }

    /// True when the PIN can no longer be used, either permanently or until the
    /// authenticator is power cycled.
    pub fn is_pin_blocked(&self) -> bool {
        self.is(StatusCode::Ctap2ErrPinBlocked) || self.is(StatusCode::Ctap2ErrPinAuthBlocked)
    }

    pub fn is_uv_blocked(&self) -> bool {
        self.is(StatusCode::Ctap2ErrUvBlocked)
    }

    pub fn is_key_store_full(&self) -> bool {
        self.is(StatusCode::Ctap2ErrKeyStoreFull)
    }

    pub fn is_invalid_option(&self) -> bool {
        self.is(StatusCode::Ctap2ErrInvalidOption)
    }

    /// The authenticator gave up on the command after a cancel request.
    pub fn is_cancelled(&self) -> bool {
        self.is(StatusCode::Ctap2ErrKeepaliveCancel)
    }
}

impl From<StatusCode> for CtapError {
    fn from(status: StatusCode) -> Self {
        CtapError::new(status.into())
    }
}

impl fmt::Display for CtapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "CTAP error 0x{:02x} ({:?}): {}", self.code, status, status),
            None => write!(f, "CTAP error 0x{:02x}", self.code),
        }
    }
}

impl std::error::Error for CtapError {}
