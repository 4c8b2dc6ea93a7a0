//! Client side engine for FIDO2/CTAP2 authenticators.
//!
//! A [`Ctap2Session`] wraps either a CTAPHID style framed connection or a smartcard
//! connection. On top of it, [`ClientPin`] runs the PIN/UV auth handshake and hands out
//! tokens that authorize [`FingerprintBioEnrollment`], [`CredentialManagement`] and
//! [`AuthenticatorConfig`] operations.
//!
//! Authenticators that only speak U2F are reached through a [`Ctap1Session`], and
//! [`CtapSession`] picks whichever protocol the authenticator supports.

pub mod authenticator_config;
pub mod bio;
pub mod cbor;
pub mod client_pin;
pub mod config;
pub mod credential_management;
pub mod crypto;
pub mod ctap;
pub mod ctap1;
pub mod error;
pub mod hid;
pub mod smartcard;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use authenticator_config::AuthenticatorConfig;
pub use bio::{
    enrollment::{EnrollmentContext, EnrollmentState},
    fingerprint::FingerprintBioEnrollment,
    BioEnrollment,
};
pub use client_pin::{ClientPin, Permissions, PinUvToken};
pub use config::SessionConfig;
pub use credential_management::CredentialManagement;
pub use crypto::{PinUvAuthProtocol, SecretBytes};
pub use ctap::{
    info::InfoData,
    session::{Ctap2Session, CtapSession},
    state::CommandState,
};
pub use ctap1::Ctap1Session;
pub use error::{CtapError, Error, Result};
pub use transport::TransportError;
