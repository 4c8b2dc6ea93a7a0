//! Connections and authenticators for unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use ciborium::value::Value;
use ring::{agreement, digest, rand::SystemRandom};
use tokio::sync::mpsc;

use crate::{
    cbor::ResponseMap,
    config::SessionConfig,
    crypto::{cose, CryptoError, PinUvAuthProtocol, SecretBytes},
    ctap::{command::StatusCode, session::Ctap2Session},
    hid::{
        command::{CommandType, KeepaliveStatus},
        Frame, HidConnection,
    },
    smartcard::SmartCardConnection,
    transport::TransportError,
};

pub(crate) type SentFrames = Arc<Mutex<Vec<Frame>>>;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// A CTAPHID response frame holding `status` and the encoded `body`.
pub(crate) fn cbor_frame(status: u8, body: Option<Value>) -> Frame {
    let mut payload = vec![status];
    if let Some(body) = body {
        ciborium::ser::into_writer(&body, &mut payload).unwrap();
    }
    Frame::new(CommandType::Cbor, payload)
}

pub(crate) fn info_frame(info: Value) -> Frame {
    cbor_frame(0x00, Some(info))
}

/// Splits a sent CTAPHID_CBOR frame into its command byte and arguments.
pub(crate) fn decode_request(frame: &Frame) -> (u8, ResponseMap) {
    let (command, args) = frame.payload.split_first().unwrap();
    let args = if args.is_empty() {
        ResponseMap::from_value(Value::Map(vec![])).unwrap()
    } else {
        ResponseMap::from_slice(args).unwrap()
    };
    (*command, args)
}

/// Replays canned frames, recording everything sent.
pub(crate) struct ScriptedHid {
    responses: VecDeque<Frame>,
    sent: SentFrames,
}

impl ScriptedHid {
    pub fn new(responses: Vec<Frame>) -> (Self, SentFrames) {
        let sent = SentFrames::default();
        let hid = ScriptedHid {
            responses: responses.into(),
            sent: sent.clone(),
        };
        (hid, sent)
    }
}

#[async_trait]
impl HidConnection for ScriptedHid {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn receive_frame(&mut self) -> Result<Frame, TransportError> {
        self.responses.pop_front().ok_or(TransportError::Closed)
    }
}

/// Replays canned response APDUs, recording every command APDU.
pub(crate) struct ScriptedCard {
    responses: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl ScriptedCard {
    pub fn new(responses: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<Bytes>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let card = ScriptedCard {
            responses: responses.into(),
            sent: sent.clone(),
        };
        (card, sent)
    }
}

#[async_trait]
impl SmartCardConnection for ScriptedCard {
    async fn transmit(&mut self, apdu: Bytes) -> Result<Vec<u8>, TransportError> {
        self.sent.lock().unwrap().push(apdu);
        self.responses.pop_front().ok_or(TransportError::Closed)
    }
}

const PIN_RETRIES: u64 = 8;

/// What a [FakeAuthenticator] knows, shared with the test that drives it.
pub(crate) struct FakeState {
    pub info: Value,
    pub pin: Option<String>,
    pub pin_retries: u64,
    pub uv_retries: u64,
    pub token: Vec<u8>,
    pub last_sub_command: Option<u8>,
    pub last_permissions: Option<u8>,
    pub last_rp_id: Option<String>,
    /// CBOR requests received so far.
    pub requests: usize,
    /// Keeps getPinUvAuthTokenUsingUvWithPermissions waiting for the user until a
    /// CTAPHID_CANCEL arrives.
    pub hold_uv: bool,
    pub cancels_received: usize,
    uv_pending: bool,
    key_agreement: Option<agreement::EphemeralPrivateKey>,
}

/// An authenticator implementing the clientPIN command on top of the real PIN/UV auth
/// protocols, so both ends of the handshake are exercised.
pub(crate) struct FakeAuthenticator {
    state: Arc<Mutex<FakeState>>,
    outgoing: mpsc::UnboundedSender<Frame>,
    responses: mpsc::UnboundedReceiver<Frame>,
}

type Reply = Result<Option<Value>, StatusCode>;

fn map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

fn pin_hash(pin: &str) -> Vec<u8> {
    digest::digest(&digest::SHA256, pin.as_bytes()).as_ref()[..16].to_vec()
}

impl FakeAuthenticator {
    pub fn new(info: Value) -> Self {
        let (outgoing, responses) = mpsc::unbounded_channel();
        FakeAuthenticator {
            state: Arc::new(Mutex::new(FakeState {
                info,
                pin: None,
                pin_retries: PIN_RETRIES,
                uv_retries: 3,
                token: vec![0x5a; 32],
                last_sub_command: None,
                last_permissions: None,
                last_rp_id: None,
                requests: 0,
                hold_uv: false,
                cancels_received: 0,
                uv_pending: false,
                key_agreement: None,
            })),
            outgoing,
            responses,
        }
    }

    pub fn with_pin(self, pin: &str) -> Self {
        self.state.lock().unwrap().pin = Some(pin.to_owned());
        self
    }

    pub fn holding_uv(self) -> Self {
        self.state.lock().unwrap().hold_uv = true;
        self
    }

    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        self.state.clone()
    }

    fn reply(&self, frame: Frame) {
        // the receiver lives in self, so the channel can't be closed
        let _ = self.outgoing.send(frame);
    }

    fn handle(&self, request: &[u8]) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        let (command, args) = request
            .split_first()
            .ok_or(StatusCode::Ctap1ErrInvalidLength)?;
        match *command {
            0x04 => Ok(Some(state.info.clone())),
            0x06 => {
                let args =
                    ResponseMap::from_slice(args).map_err(|_| StatusCode::Ctap2ErrInvalidCbor)?;
                state.client_pin(&args)
            }
            _ => Err(StatusCode::Ctap1ErrInvalidCommand),
        }
    }
}

impl FakeState {
    fn shared_secret(
        &mut self,
        protocol: PinUvAuthProtocol,
        args: &ResponseMap,
    ) -> Result<SecretBytes, StatusCode> {
        let private = self
            .key_agreement
            .take()
            .ok_or(StatusCode::Ctap2ErrPinAuthInvalid)?;
        let platform_key = args.get(3).ok_or(StatusCode::Ctap2ErrMissingParameter)?;
        let point = cose::point_from_key_agreement(platform_key)
            .map_err(|_| StatusCode::Ctap1ErrInvalidParameter)?;
        let peer = agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, point);
        agreement::agree_ephemeral(
            private,
            &peer,
            CryptoError::InvalidPeerKey("fake".into()),
            |z| protocol.kdf(z),
        )
        .map_err(|_| StatusCode::Ctap1ErrInvalidParameter)
    }

    fn verify(
        protocol: PinUvAuthProtocol,
        key: &[u8],
        message: &[u8],
        args: &ResponseMap,
    ) -> Result<(), StatusCode> {
        let param = args
            .bytes(4)
            .ok()
            .flatten()
            .ok_or(StatusCode::Ctap2ErrMissingParameter)?;
        if protocol.authenticate(key, message) != param {
            return Err(StatusCode::Ctap2ErrPinAuthInvalid);
        }
        Ok(())
    }

    fn check_pin_hash(
        &mut self,
        protocol: PinUvAuthProtocol,
        key: &[u8],
        args: &ResponseMap,
    ) -> Result<(), StatusCode> {
        let pin_hash_enc = args
            .bytes(6)
            .ok()
            .flatten()
            .ok_or(StatusCode::Ctap2ErrMissingParameter)?;
        let received = protocol
            .decrypt(key, pin_hash_enc)
            .map_err(|_| StatusCode::Ctap2ErrPinInvalid)?;
        let expected = self.pin.as_deref().map(pin_hash);
        if expected.as_deref() != Some(&received[..]) {
            self.pin_retries = self.pin_retries.saturating_sub(1);
            return Err(StatusCode::Ctap2ErrPinInvalid);
        }
        self.pin_retries = PIN_RETRIES;
        Ok(())
    }

    fn decrypt_new_pin(
        protocol: PinUvAuthProtocol,
        key: &[u8],
        args: &ResponseMap,
    ) -> Result<String, StatusCode> {
        let new_pin_enc = args
            .bytes(5)
            .ok()
            .flatten()
            .ok_or(StatusCode::Ctap2ErrMissingParameter)?;
        let padded = protocol
            .decrypt(key, new_pin_enc)
            .map_err(|_| StatusCode::Ctap2ErrPinPolicyViolation)?;
        if padded.len() != 64 {
            return Err(StatusCode::Ctap2ErrPinPolicyViolation);
        }
        let end = padded.iter().position(|b| *b == 0).unwrap_or(padded.len());
        String::from_utf8(padded[..end].to_vec()).map_err(|_| StatusCode::Ctap2ErrPinPolicyViolation)
    }

    fn issue_token(
        &mut self,
        protocol: PinUvAuthProtocol,
        key: &[u8],
        args: &ResponseMap,
    ) -> Reply {
        self.last_permissions = args.uint(9).ok().flatten().map(|p| p as u8);
        self.last_rp_id = args.text(10).ok().flatten().map(str::to_owned);
        let token_enc = protocol
            .encrypt(key, &self.token)
            .map_err(|_| StatusCode::Ctap1ErrOther)?;
        Ok(Some(map(vec![(2, Value::Bytes(token_enc))])))
    }

    fn client_pin(&mut self, args: &ResponseMap) -> Reply {
        let sub_command = args
            .uint(2)
            .ok()
            .flatten()
            .ok_or(StatusCode::Ctap2ErrMissingParameter)? as u8;
        self.last_sub_command = Some(sub_command);
        let protocol = args
            .uint(1)
            .ok()
            .flatten()
            .and_then(|v| PinUvAuthProtocol::from_version(v as u8));

        match sub_command {
            0x01 => Ok(Some(map(vec![
                (3, Value::from(self.pin_retries)),
                (4, Value::Bool(false)),
            ]))),
            0x07 => Ok(Some(map(vec![(5, Value::from(self.uv_retries))]))),
            0x02 => {
                let private = agreement::EphemeralPrivateKey::generate(
                    &agreement::ECDH_P256,
                    &SystemRandom::new(),
                )
                .map_err(|_| StatusCode::Ctap1ErrOther)?;
                let public = private
                    .compute_public_key()
                    .map_err(|_| StatusCode::Ctap1ErrOther)?;
                self.key_agreement = Some(private);
                let key = cose::key_agreement_from_point(public.as_ref())
                    .map_err(|_| StatusCode::Ctap1ErrOther)?;
                Ok(Some(map(vec![(1, key)])))
            }
            _ => {
                let protocol = protocol.ok_or(StatusCode::Ctap2ErrMissingParameter)?;
                let key = self.shared_secret(protocol, args)?;
                match sub_command {
                    0x03 => {
                        if self.pin.is_some() {
                            return Err(StatusCode::Ctap2ErrPinAuthInvalid);
                        }
                        let new_pin_enc = args.bytes(5).ok().flatten().unwrap_or_default();
                        Self::verify(protocol, &key, new_pin_enc, args)?;
                        self.pin = Some(Self::decrypt_new_pin(protocol, &key, args)?);
                        Ok(None)
                    }
                    0x04 => {
                        let mut message = args.bytes(5).ok().flatten().unwrap_or_default().to_vec();
                        message.extend_from_slice(args.bytes(6).ok().flatten().unwrap_or_default());
                        Self::verify(protocol, &key, &message, args)?;
                        self.check_pin_hash(protocol, &key, args)?;
                        self.pin = Some(Self::decrypt_new_pin(protocol, &key, args)?);
                        Ok(None)
                    }
                    0x05 | 0x09 => {
                        self.check_pin_hash(protocol, &key, args)?;
                        self.issue_token(protocol, &key, args)
                    }
                    0x06 if self.hold_uv => {
                        self.uv_pending = true;
                        Err(StatusCode::Ctap2ErrKeepaliveCancel)
                    }
                    0x06 => self.issue_token(protocol, &key, args),
                    _ => Err(StatusCode::Ctap2ErrInvalidSubcommand),
                }
            }
        }
    }
}

#[async_trait]
impl HidConnection for FakeAuthenticator {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if frame.command == Ok(CommandType::Cancel) {
            let mut state = self.state.lock().unwrap();
            state.cancels_received += 1;
            if state.uv_pending {
                state.uv_pending = false;
                let status = StatusCode::Ctap2ErrKeepaliveCancel;
                self.reply(Frame::new(CommandType::Cbor, vec![status.into()]));
            }
            return Ok(());
        }
        if frame.command != Ok(CommandType::Cbor) {
            return Ok(());
        }
        let reply = self.handle(&frame.payload);
        if self.state.lock().unwrap().uv_pending {
            let waiting = u8::from(KeepaliveStatus::Upneeded);
            self.reply(Frame::new(CommandType::Keepalive, vec![waiting]));
            return Ok(());
        }
        let payload = match reply {
            Ok(body) => {
                let mut payload = vec![0x00];
                if let Some(body) = body {
                    ciborium::ser::into_writer(&body, &mut payload).unwrap();
                }
                payload
            }
            Err(status) => vec![status.into()],
        };
        self.reply(Frame::new(CommandType::Cbor, payload));
        Ok(())
    }

    async fn receive_frame(&mut self) -> Result<Frame, TransportError> {
        self.responses.recv().await.ok_or(TransportError::Closed)
    }
}

/// Opens a HID session over `fake` with the default configuration.
pub(crate) async fn fake_session(fake: FakeAuthenticator) -> Ctap2Session {
    init_logging();
    Ctap2Session::open_hid(Box::new(fake), SessionConfig::default())
        .await
        .unwrap()
}
