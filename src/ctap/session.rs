use ciborium::value::Value;
use tracing::{debug, instrument, trace};

use super::{
    command::CtapCommand,
    info::{InfoData, FIDO_2_1_PRE},
    params::{BioEnrollmentParams, ClientPinParams, SubCommandParams},
    state::CommandState,
    types::{AssertionResponse, AttestationResponse, GetAssertionParams, MakeCredentialParams},
};
use crate::{
    cbor::{encode_request, ResponseMap},
    config::SessionConfig,
    ctap1::Ctap1Session,
    error::{CtapError, Error, Result},
    hid::{HidBackend, HidConnection},
    smartcard::{ApduBackend, SmartCardConnection},
    transport::{TransportError, Version},
};

/// The link a session talks over, shared by the CTAP1 and CTAP2 sessions.
pub(crate) enum Backend {
    Hid(HidBackend),
    Apdu(ApduBackend),
}

impl Backend {
    pub(crate) fn version(&self) -> Version {
        match self {
            Backend::Hid(hid) => hid.version(),
            Backend::Apdu(apdu) => apdu.version(),
        }
    }
}

/// A CTAP2 session over one authenticator connection.
///
/// Only one command may be in flight at a time, hence every command takes `&mut self`.
pub struct Ctap2Session {
    backend: Backend,
    info: InfoData,
    config: SessionConfig,
}

impl Ctap2Session {
    /// Opens a session over a CTAPHID connection and reads the authenticator info.
    #[instrument(skip_all)]
    pub async fn open_hid(
        connection: Box<dyn HidConnection>,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::open(Backend::Hid(HidBackend::new(connection)), config).await
    }

    /// Selects the FIDO applet on a smartcard connection and reads the authenticator
    /// info. Commands sent over this session can't be cancelled.
    #[instrument(skip_all)]
    pub async fn open_smartcard(
        connection: Box<dyn SmartCardConnection>,
        config: SessionConfig,
    ) -> Result<Self> {
        let backend = ApduBackend::open(connection, config.extended_length).await?;
        Self::open(Backend::Apdu(backend), config).await
    }

    async fn open(backend: Backend, config: SessionConfig) -> Result<Self> {
        Self::try_open(backend, config).await.map_err(|(_, err)| err)
    }

    /// Like [Self::open], but hands the backend back when getInfo fails.
    async fn try_open(
        backend: Backend,
        config: SessionConfig,
    ) -> std::result::Result<Self, (Backend, Error)> {
        let mut session = Ctap2Session {
            backend,
            info: InfoData::default(),
            config,
        };
        match session.get_info().await {
            Ok(info) => {
                debug!(versions = ?info.versions, "Opened CTAP2 session");
                Ok(session)
            }
            Err(err) => Err((session.backend, err)),
        }
    }

    /// Device version, `0.0.0` when the link doesn't report one.
    pub fn version(&self) -> Version {
        self.backend.version()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The info read when the session was opened, or by the last [Self::get_info].
    pub fn cached_info(&self) -> &InfoData {
        &self.info
    }

    /// Whether commands can be cancelled through a [CommandState] on this session.
    pub fn supports_cancellation(&self) -> bool {
        matches!(self.backend, Backend::Hid(_))
    }

    /// Sends a command and decodes its response. A bare success status yields `None`,
    /// any other status is a [CtapError].
    #[instrument(skip(self, args, state), level = "debug")]
    pub async fn send_cbor(
        &mut self,
        command: CtapCommand,
        args: Option<Value>,
        state: Option<&CommandState>,
    ) -> Result<Option<ResponseMap>> {
        let request = encode_request(command, args)?;
        let response = match &mut self.backend {
            Backend::Hid(hid) => hid.send_cbor(request, state).await?,
            Backend::Apdu(apdu) => apdu.send_cbor(request, state).await?,
        };
        let (status, body) = response
            .split_first()
            .ok_or(TransportError::EmptyResponse)?;
        if *status != 0x00 {
            let err = CtapError::new(*status);
            debug!(%err, "Authenticator rejected the command");
            return Err(err.into());
        }
        if body.is_empty() {
            trace!("Success without response data");
            return Ok(None);
        }
        ResponseMap::from_slice(body).map(Some)
    }

    async fn send_expecting_data(
        &mut self,
        command: CtapCommand,
        args: Option<Value>,
        state: Option<&CommandState>,
    ) -> Result<ResponseMap> {
        self.send_cbor(command, args, state)
            .await?
            .ok_or_else(|| Error::bad_response(format!("{:?} returned no data", command)))
    }

    /// Reads the authenticator info again, refreshing [Self::cached_info].
    #[instrument(skip(self))]
    pub async fn get_info(&mut self) -> Result<InfoData> {
        let response = self
            .send_expecting_data(CtapCommand::GetInfo, None, None)
            .await?;
        let info = InfoData::from_response(&response)?;
        self.info = info.clone();
        Ok(info)
    }

    #[instrument(skip_all)]
    pub async fn make_credential(
        &mut self,
        params: &MakeCredentialParams,
        state: Option<&CommandState>,
    ) -> Result<AttestationResponse> {
        let response = self
            .send_expecting_data(CtapCommand::MakeCredential, Some(params.to_args()?), state)
            .await?;
        AttestationResponse::from_response(&response)
    }

    /// Gets an assertion, then every further assertion the authenticator announced.
    #[instrument(skip_all)]
    pub async fn get_assertions(
        &mut self,
        params: &GetAssertionParams,
        state: Option<&CommandState>,
    ) -> Result<Vec<AssertionResponse>> {
        let response = self
            .send_expecting_data(CtapCommand::GetAssertion, Some(params.to_args()?), state)
            .await?;
        let first = AssertionResponse::from_response(&response)?;
        let count = first.number_of_credentials.unwrap_or(1);
        let mut assertions = vec![first];
        for _ in 1..count {
            let response = self
                .send_expecting_data(CtapCommand::GetNextAssertion, None, None)
                .await?;
            assertions.push(AssertionResponse::from_response(&response)?);
        }
        debug!(count = assertions.len(), "Got assertions");
        Ok(assertions)
    }

    #[instrument(skip_all)]
    pub async fn client_pin(
        &mut self,
        params: &ClientPinParams,
        state: Option<&CommandState>,
    ) -> Result<Option<ResponseMap>> {
        self.send_cbor(CtapCommand::ClientPin, Some(params.to_args()), state)
            .await
    }

    /// Preview command byte for authenticators that only know the FIDO_2_1_PRE flavor.
    fn pick_command(&self, option: &str, stable: CtapCommand, preview: CtapCommand) -> CtapCommand {
        if !self.info.has_option(option) && self.info.supports_version(FIDO_2_1_PRE) {
            preview
        } else {
            stable
        }
    }

    #[instrument(skip_all)]
    pub async fn bio_enrollment(
        &mut self,
        params: &BioEnrollmentParams,
        state: Option<&CommandState>,
    ) -> Result<Option<ResponseMap>> {
        let command = self.pick_command(
            "bioEnroll",
            CtapCommand::BioEnrollment,
            CtapCommand::BioEnrollmentPreview,
        );
        self.send_cbor(command, Some(params.to_args()), state).await
    }

    #[instrument(skip_all)]
    pub async fn credential_management(
        &mut self,
        params: &SubCommandParams,
    ) -> Result<Option<ResponseMap>> {
        let command = self.pick_command(
            "credMgmt",
            CtapCommand::CredentialManagement,
            CtapCommand::CredentialManagementPreview,
        );
        self.send_cbor(command, Some(params.to_args()), None).await
    }

    #[instrument(skip_all)]
    pub async fn authenticator_config(
        &mut self,
        params: &SubCommandParams,
    ) -> Result<Option<ResponseMap>> {
        self.send_cbor(CtapCommand::Config, Some(params.to_args()), None)
            .await
    }

    /// Factory resets the authenticator, which waits for user presence.
    #[instrument(skip_all)]
    pub async fn reset(&mut self, state: Option<&CommandState>) -> Result<()> {
        self.send_cbor(CtapCommand::Reset, None, state).await?;
        debug!("Authenticator reset");
        Ok(())
    }

    /// Asks the user to touch this authenticator, to pick it among several.
    #[instrument(skip_all)]
    pub async fn selection(&mut self, state: Option<&CommandState>) -> Result<()> {
        self.send_cbor(CtapCommand::Selection, None, state).await?;
        Ok(())
    }
}

/// A session with whichever protocol the authenticator speaks, CTAP2 when it can.
pub enum CtapSession {
    Ctap2(Ctap2Session),
    Ctap1(Ctap1Session),
}

impl CtapSession {
    #[instrument(skip_all)]
    pub async fn open_hid(
        connection: Box<dyn HidConnection>,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::detect(Backend::Hid(HidBackend::new(connection)), config).await
    }

    #[instrument(skip_all)]
    pub async fn open_smartcard(
        connection: Box<dyn SmartCardConnection>,
        config: SessionConfig,
    ) -> Result<Self> {
        let backend = ApduBackend::open(connection, config.extended_length).await?;
        Self::detect(Backend::Apdu(backend), config).await
    }

    /// Tries getInfo, then falls back to a U2F version request on the same link. When
    /// both fail the getInfo error is returned.
    async fn detect(backend: Backend, config: SessionConfig) -> Result<Self> {
        let (backend, err) = match Ctap2Session::try_open(backend, config).await {
            Ok(session) => return Ok(CtapSession::Ctap2(session)),
            Err(failed) => failed,
        };
        debug!(%err, "CTAP2 is not available, trying CTAP1");
        let mut session = Ctap1Session::from_backend(backend);
        match session.get_u2f_version().await {
            Ok(version) => {
                debug!(%version, "Opened CTAP1 session");
                Ok(CtapSession::Ctap1(session))
            }
            Err(u2f_err) => {
                debug!(%u2f_err, "CTAP1 is not available either");
                Err(err)
            }
        }
    }

    pub fn version(&self) -> Version {
        match self {
            CtapSession::Ctap2(session) => session.version(),
            CtapSession::Ctap1(session) => session.version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ctap::command::StatusCode,
        hid::command::CommandType,
        hid::transport::Frame,
        testing::{cbor_frame, info_frame, ScriptedCard, ScriptedHid},
    };
    use ciborium::cbor;

    async fn hid_session(
        mut frames: Vec<Frame>,
        info: Value,
    ) -> (Ctap2Session, crate::testing::SentFrames) {
        frames.insert(0, info_frame(info));
        let (hid, sent) = ScriptedHid::new(frames);
        let session = Ctap2Session::open_hid(Box::new(hid), SessionConfig::default())
            .await
            .unwrap();
        (session, sent)
    }

    #[tokio::test]
    async fn test_open_reads_info() {
        let (session, sent) =
            hid_session(vec![], cbor!({ 1 => ["FIDO_2_0"], 6 => [1] }).unwrap()).await;
        assert_eq!(session.cached_info().versions, vec!["FIDO_2_0"]);
        assert_eq!(session.cached_info().pin_uv_auth_protocols, vec![1]);
        assert!(session.supports_cancellation());
        assert_eq!(
            sent.lock().unwrap()[0],
            Frame::new(CommandType::Cbor, vec![0x04])
        );
    }

    #[tokio::test]
    async fn test_status_only_success_is_none() {
        let (mut session, _) = hid_session(
            vec![cbor_frame(0x00, None)],
            cbor!({ 1 => ["FIDO_2_1"] }).unwrap(),
        )
        .await;
        let response = session
            .send_cbor(CtapCommand::Selection, None, None)
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_ctap_error() {
        let (mut session, _) = hid_session(
            vec![cbor_frame(0x31, None)],
            cbor!({ 1 => ["FIDO_2_1"] }).unwrap(),
        )
        .await;
        let err = session
            .client_pin(&ClientPinParams::new(2, 0x01), None)
            .await
            .unwrap_err();
        assert!(err.ctap_error().unwrap().is(StatusCode::Ctap2ErrPinInvalid));
    }

    #[tokio::test]
    async fn test_preview_command_byte() {
        let (mut session, sent) = hid_session(
            vec![cbor_frame(0x00, Some(cbor!({ 1 => 1 }).unwrap()))],
            cbor!({ 1 => ["FIDO_2_0", "FIDO_2_1_PRE"], 4 => { "userVerificationMgmtPreview" => true } })
                .unwrap(),
        )
        .await;
        session
            .bio_enrollment(
                &BioEnrollmentParams {
                    get_modality: Some(true),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap()[1].payload, vec![0x40, 0xa1, 0x06, 0xf5]);
    }

    #[tokio::test]
    async fn test_get_assertions_follows_count() {
        let assertion = |n: u8, count: Option<u8>| {
            let mut map = vec![
                (Value::from(2u8), Value::Bytes(vec![n; 37])),
                (Value::from(3u8), Value::Bytes(vec![n])),
            ];
            if let Some(count) = count {
                map.push((Value::from(5u8), Value::from(count)));
            }
            cbor_frame(0x00, Some(Value::Map(map)))
        };
        let (mut session, sent) = hid_session(
            vec![assertion(1, Some(3)), assertion(2, None), assertion(3, None)],
            cbor!({ 1 => ["FIDO_2_1"] }).unwrap(),
        )
        .await;
        let assertions = session
            .get_assertions(
                &GetAssertionParams {
                    rp_id: "example.com".into(),
                    client_data_hash: vec![0; 32],
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(assertions.len(), 3);
        assert_eq!(assertions[2].signature, vec![3]);
        assert_eq!(sent.lock().unwrap()[3].payload, vec![0x08]);
    }

    #[tokio::test]
    async fn test_detect_prefers_ctap2() {
        let (hid, sent) = ScriptedHid::new(vec![info_frame(
            cbor!({ 1 => ["FIDO_2_0", "U2F_V2"] }).unwrap(),
        )]);
        let session = CtapSession::open_hid(Box::new(hid), SessionConfig::default())
            .await
            .unwrap();
        assert!(matches!(session, CtapSession::Ctap2(_)));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_ctap1() {
        let (hid, sent) = ScriptedHid::new(vec![
            Frame::new(CommandType::Error, vec![0x01]),
            Frame::new(CommandType::Msg, b"U2F_V2\x90\x00".to_vec()),
        ]);
        let session = CtapSession::open_hid(Box::new(hid), SessionConfig::default())
            .await
            .unwrap();
        assert!(matches!(session, CtapSession::Ctap1(_)));
        let sent = sent.lock().unwrap();
        assert_eq!(sent[1].command, Ok(CommandType::Msg));
        assert_eq!(sent[1].payload, vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_detect_reports_ctap2_error_when_both_fail() {
        let (hid, _sent) = ScriptedHid::new(vec![Frame::new(CommandType::Error, vec![0x01])]);
        let err = CtapSession::open_hid(Box::new(hid), SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport(TransportError::HidError(0x01))));
    }

    #[tokio::test]
    async fn test_smartcard_session() {
        let mut info = vec![0x00];
        ciborium::ser::into_writer(&cbor!({ 1 => ["FIDO_2_0"] }).unwrap(), &mut info).unwrap();
        info.extend_from_slice(&[0x90, 0x00]);
        let (card, _sent) = ScriptedCard::new(vec![b"FIDO_2_0\x90\x00".to_vec(), info]);
        let session = Ctap2Session::open_smartcard(Box::new(card), SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(session.version(), Version::new(0, 0, 0));
        assert!(!session.supports_cancellation());
        assert!(session.cached_info().supports_version("FIDO_2_0"));
    }
}
