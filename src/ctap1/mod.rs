//! CTAP1/U2F raw messages, for authenticators that don't speak CTAP2.
//!
//! Requests are ISO 7816 APDUs. Over CTAPHID they travel in CTAPHID_MSG frames using the
//! extended length encoding, over a smartcard link they go to the same FIDO applet as
//! CTAP2 requests do.

pub mod message;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, instrument, trace};

pub use self::message::{RegistrationData, SignatureData};
use crate::{
    config::SessionConfig,
    ctap::session::Backend,
    error::{Error, Result},
    hid::{command::CommandType, HidBackend, HidConnection},
    smartcard::{
        apdu::{split_status, Apdu, ApduHeader, SW_SUCCESS},
        ApduBackend, SmartCardConnection,
    },
    transport::{TransportError, Version},
};

const CLA: u8 = 0x00;
const INS_REGISTER: u8 = 0x01;
const INS_AUTHENTICATE: u8 = 0x02;
const INS_VERSION: u8 = 0x03;

pub const P1_ENFORCE_USER_PRESENCE: u8 = 0x03;
pub const P1_CHECK_ONLY: u8 = 0x07;

/// Status words of a U2F authenticator.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum StatusWord {
    NoError = 0x9000,
    /// Test of user presence required, or a check-only request for a known key handle.
    ConditionsNotSatisfied = 0x6985,
    /// The key handle was not created by this authenticator.
    WrongData = 0x6A80,
    WrongLength = 0x6700,
    ClaNotSupported = 0x6E00,
    InsNotSupported = 0x6D00,
}

/// A U2F session over one authenticator connection.
pub struct Ctap1Session {
    backend: Backend,
}

impl Ctap1Session {
    /// Wraps a CTAPHID connection, nothing is sent until the first command.
    pub fn open_hid(connection: Box<dyn HidConnection>) -> Self {
        Self::from_backend(Backend::Hid(HidBackend::new(connection)))
    }

    /// Selects the FIDO applet on a smartcard connection.
    #[instrument(skip_all)]
    pub async fn open_smartcard(
        connection: Box<dyn SmartCardConnection>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let backend = ApduBackend::open(connection, config.extended_length).await?;
        Ok(Self::from_backend(Backend::Apdu(backend)))
    }

    pub(crate) fn from_backend(backend: Backend) -> Self {
        Ctap1Session { backend }
    }

    /// Device version, `0.0.0` over smartcard links.
    pub fn version(&self) -> Version {
        self.backend.version()
    }

    /// Sends one request and returns its response body. Status words other than
    /// `9000` become [TransportError::ApduStatus].
    async fn send_apdu(&mut self, ins: u8, p1: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        match &mut self.backend {
            Backend::Hid(hid) => {
                let header = ApduHeader {
                    cla: CLA,
                    ins,
                    p1,
                    p2: 0x00,
                };
                let request = Apdu::encode_extended(header, &data);
                let response = hid
                    .send_message(CommandType::Msg, request.to_vec(), None)
                    .await?;
                let (body, sw) = split_status(&response).ok_or(TransportError::EmptyResponse)?;
                trace!(sw, "U2F response");
                if sw != SW_SUCCESS {
                    return Err(TransportError::ApduStatus(sw).into());
                }
                Ok(body.to_vec())
            }
            Backend::Apdu(apdu) => Ok(apdu
                .send_apdu(Apdu::new(CLA, ins, p1, 0x00, data))
                .await?),
        }
    }

    /// The U2F protocol version, `U2F_V2` for every current authenticator.
    #[instrument(skip(self))]
    pub async fn get_u2f_version(&mut self) -> Result<String> {
        let response = self.send_apdu(INS_VERSION, 0x00, Vec::new()).await?;
        String::from_utf8(response)
            .map_err(|e| Error::bad_response(format!("U2F version is not UTF-8: {}", e)))
    }

    /// Creates a key pair for `app_param`. Until the user touches the authenticator it
    /// answers with [StatusWord::ConditionsNotSatisfied], callers poll by repeating the
    /// request.
    #[instrument(skip_all)]
    pub async fn register(
        &mut self,
        client_param: &[u8; 32],
        app_param: &[u8; 32],
    ) -> Result<RegistrationData> {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(client_param);
        data.extend_from_slice(app_param);
        let response = self.send_apdu(INS_REGISTER, 0x00, data).await?;
        let registration = RegistrationData::parse(&response)?;
        debug!(
            key_handle_len = registration.key_handle.len(),
            "Registered U2F credential"
        );
        Ok(registration)
    }

    /// Signs with the key behind `key_handle`, requiring user presence.
    ///
    /// With `check_only` nothing is signed: a key handle owned by this authenticator
    /// fails with [Error::CredentialExcluded], any other key handle with
    /// [StatusWord::WrongData].
    #[instrument(skip(self, client_param, app_param, key_handle))]
    pub async fn authenticate(
        &mut self,
        client_param: &[u8; 32],
        app_param: &[u8; 32],
        key_handle: &[u8],
        check_only: bool,
    ) -> Result<SignatureData> {
        let key_handle_len = u8::try_from(key_handle.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "Key handle of {} bytes is too long",
                key_handle.len()
            ))
        })?;
        let mut data = Vec::with_capacity(64 + 1 + key_handle.len());
        data.extend_from_slice(client_param);
        data.extend_from_slice(app_param);
        data.push(key_handle_len);
        data.extend_from_slice(key_handle);

        let p1 = if check_only {
            P1_CHECK_ONLY
        } else {
            P1_ENFORCE_USER_PRESENCE
        };
        match self.send_apdu(INS_AUTHENTICATE, p1, data).await {
            Ok(response) => SignatureData::parse(&response),
            Err(err)
                if check_only
                    && err.status_word() == Some(StatusWord::ConditionsNotSatisfied.into()) =>
            {
                debug!("Key handle belongs to this authenticator");
                Err(Error::CredentialExcluded)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{message::tests::registration, *};
    use crate::{
        hid::Frame,
        testing::{ScriptedCard, ScriptedHid},
    };
    use ring::signature::KeyPair;

    fn msg(mut body: Vec<u8>, sw: StatusWord) -> Frame {
        body.extend_from_slice(&u16::from(sw).to_be_bytes());
        Frame::new(CommandType::Msg, body)
    }

    #[tokio::test]
    async fn test_register_over_hid() {
        let credential = message::tests::key_pair();
        let response = registration(&credential, &[0xaa; 32], &[0xcc; 32]);
        let (hid, sent) = ScriptedHid::new(vec![
            msg(vec![], StatusWord::ConditionsNotSatisfied),
            msg(response, StatusWord::NoError),
        ]);
        let mut session = Ctap1Session::open_hid(Box::new(hid));

        let err = session.register(&[0xcc; 32], &[0xaa; 32]).await.unwrap_err();
        assert_eq!(err.status_word(), Some(0x6985));
        let registration = session.register(&[0xcc; 32], &[0xaa; 32]).await.unwrap();
        assert_eq!(registration.public_key, credential.public_key().as_ref());
        registration.verify(&[0xaa; 32], &[0xcc; 32]).unwrap();

        let sent = sent.lock().unwrap();
        let request = &sent[1];
        assert_eq!(request.command, Ok(CommandType::Msg));
        assert_eq!(hex::encode(&request.payload[..7]), "00010000000040");
        assert_eq!(&request.payload[7..39], &[0xcc; 32]);
        assert_eq!(&request.payload[39..71], &[0xaa; 32]);
        assert_eq!(&request.payload[71..], &[0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_authenticate_over_hid() {
        let (hid, sent) = ScriptedHid::new(vec![msg(
            vec![0x01, 0x00, 0x00, 0x01, 0x00, 0x30, 0x44],
            StatusWord::NoError,
        )]);
        let mut session = Ctap1Session::open_hid(Box::new(hid));
        let signature = session
            .authenticate(&[0x11; 32], &[0x22; 32], &[0x4b; 16], false)
            .await
            .unwrap();
        assert!(signature.is_user_present());
        assert_eq!(signature.counter, 0x100);
        assert_eq!(signature.signature, vec![0x30, 0x44]);

        let sent = sent.lock().unwrap();
        assert_eq!(hex::encode(&sent[0].payload[..7]), "00020300000051");
        assert_eq!(sent[0].payload[71], 16);
        assert_eq!(&sent[0].payload[72..88], &[0x4b; 16]);
    }

    #[tokio::test]
    async fn test_check_only_known_key_handle() {
        let (hid, sent) = ScriptedHid::new(vec![
            msg(vec![], StatusWord::ConditionsNotSatisfied),
            msg(vec![], StatusWord::WrongData),
        ]);
        let mut session = Ctap1Session::open_hid(Box::new(hid));
        assert!(matches!(
            session
                .authenticate(&[0; 32], &[0; 32], &[0x01; 8], true)
                .await,
            Err(Error::CredentialExcluded)
        ));
        let err = session
            .authenticate(&[0; 32], &[0; 32], &[0x02; 8], true)
            .await
            .unwrap_err();
        assert_eq!(err.status_word(), Some(u16::from(StatusWord::WrongData)));
        assert_eq!(sent.lock().unwrap()[0].payload[2], P1_CHECK_ONLY);
    }

    #[tokio::test]
    async fn test_key_handle_too_long() {
        let (hid, sent) = ScriptedHid::new(vec![]);
        let mut session = Ctap1Session::open_hid(Box::new(hid));
        assert!(matches!(
            session
                .authenticate(&[0; 32], &[0; 32], &[0; 256], false)
                .await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_over_smartcard() {
        let (card, sent) = ScriptedCard::new(vec![
            b"U2F_V2\x90\x00".to_vec(),
            b"U2F_V2\x90\x00".to_vec(),
        ]);
        let mut session = Ctap1Session::open_smartcard(Box::new(card), &SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(session.get_u2f_version().await.unwrap(), "U2F_V2");
        assert_eq!(session.version(), Version::default());
        assert_eq!(hex::encode(&sent.lock().unwrap()[1]), "0003000000");
    }

    #[tokio::test]
    async fn test_short_hid_response() {
        let (hid, _sent) = ScriptedHid::new(vec![Frame::new(CommandType::Msg, vec![0x90])]);
        let mut session = Ctap1Session::open_hid(Box::new(hid));
        assert!(matches!(
            session.get_u2f_version().await,
            Err(Error::Transport(TransportError::EmptyResponse))
        ));
    }
}
