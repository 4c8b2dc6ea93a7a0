//! authenticatorClientPIN: PIN management and PIN/UV auth token acquisition.

use modular_bitfield::bitfield;
use ring::digest;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    crypto::{PinUvAuthProtocol, SecretBytes, SharedSecretPair},
    ctap::{info::InfoData, params::ClientPinParams, session::Ctap2Session, state::CommandState},
    error::{Error, Result},
};

mod sub_command {
    pub const GET_PIN_RETRIES: u8 = 0x01;
    pub const GET_KEY_AGREEMENT: u8 = 0x02;
    pub const SET_PIN: u8 = 0x03;
    pub const CHANGE_PIN: u8 = 0x04;
    pub const GET_PIN_TOKEN: u8 = 0x05;
    pub const GET_TOKEN_USING_UV_WITH_PERMISSIONS: u8 = 0x06;
    pub const GET_UV_RETRIES: u8 = 0x07;
    pub const GET_TOKEN_USING_PIN_WITH_PERMISSIONS: u8 = 0x09;
}

mod result {
    pub const KEY_AGREEMENT: u64 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: u64 = 0x02;
    pub const PIN_RETRIES: u64 = 0x03;
    pub const POWER_CYCLE_STATE: u64 = 0x04;
    pub const UV_RETRIES: u64 = 0x05;
}

const MIN_PIN_LEN: usize = 4;
const PIN_BUFFER_LEN: usize = 64;
const MAX_PIN_LEN: usize = PIN_BUFFER_LEN - 1;
const PIN_HASH_LEN: usize = 16;

/// Operations a PIN/UV auth token may be scoped to.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub make_credential: bool,
    pub get_assertion: bool,
    pub credential_management: bool,
    pub bio_enrollment: bool,
    pub large_blob_write: bool,
    pub authenticator_config: bool,
    /// Asks the authenticator for proof of user presence when issuing the token.
    pub user_presence_required: bool,
    #[skip]
    __: bool,
}

impl Permissions {
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    pub const GET_ASSERTION: u8 = 0x02;
    pub const CREDENTIAL_MANAGEMENT: u8 = 0x04;
    pub const BIO_ENROLLMENT: u8 = 0x08;
    pub const LARGE_BLOB_WRITE: u8 = 0x10;
    pub const AUTHENTICATOR_CONFIG: u8 = 0x20;
    pub const USER_PRESENCE_REQUIRED: u8 = 0x40;

    pub fn from_bits(bits: u8) -> Self {
        Permissions::from_bytes([bits])
    }

    pub fn bits(self) -> u8 {
        self.into_bytes()[0]
    }
}

/// A PIN/UV auth token together with the protocol it was obtained under.
pub struct PinUvToken {
    protocol: PinUvAuthProtocol,
    token: SecretBytes,
}

impl PinUvToken {
    pub fn new(protocol: PinUvAuthProtocol, token: SecretBytes) -> Self {
        PinUvToken { protocol, token }
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.token
    }

    /// Computes the `pinUvAuthParam` of a request authorized by this token.
    pub fn authenticate(&self, message: &[u8]) -> Vec<u8> {
        self.protocol.authenticate(&self.token, message)
    }
}

impl std::fmt::Debug for PinUvToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinUvToken")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Attempts left before the PIN or built-in UV gets blocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub retries: u64,
    /// Set when the authenticator must be power cycled before the next attempt.
    pub power_cycle_state: Option<bool>,
}

/// Validates a PIN and returns its UTF-8 encoding, zero padded to 64 bytes when `pad`
/// is set.
pub fn prepare_pin(pin: &str, pad: bool) -> Result<SecretBytes> {
    if pin.chars().count() < MIN_PIN_LEN {
        return Err(Error::InvalidPin(format!(
            "PIN must be at least {} characters",
            MIN_PIN_LEN
        )));
    }
    let encoded = pin.as_bytes();
    if encoded.len() > MAX_PIN_LEN {
        return Err(Error::InvalidPin(format!(
            "PIN must be no more than {} bytes",
            MAX_PIN_LEN
        )));
    }
    // sized up front so padding never reallocates and leaves a stray copy behind
    let mut prepared = Zeroizing::new(Vec::with_capacity(PIN_BUFFER_LEN));
    prepared.extend_from_slice(encoded);
    if pad {
        prepared.resize(PIN_BUFFER_LEN, 0);
    }
    Ok(prepared)
}

/// First 16 bytes of SHA-256 over the unpadded PIN.
fn pin_hash(pin: &str) -> Result<SecretBytes> {
    let prepared = prepare_pin(pin, false)?;
    let mut full = Zeroizing::new([0u8; digest::SHA256_OUTPUT_LEN]);
    full.copy_from_slice(digest::digest(&digest::SHA256, &prepared).as_ref());
    Ok(Zeroizing::new(full[..PIN_HASH_LEN].to_vec()))
}

/// Encrypted fields of a setPIN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SetPinMessage {
    pub new_pin_enc: Vec<u8>,
    pub pin_uv_auth_param: Vec<u8>,
}

pub(crate) fn set_pin_message(
    protocol: PinUvAuthProtocol,
    shared_secret: &[u8],
    new_pin: &str,
) -> Result<SetPinMessage> {
    let padded = prepare_pin(new_pin, true)?;
    let new_pin_enc = protocol.encrypt(shared_secret, &padded)?;
    let pin_uv_auth_param = protocol.authenticate(shared_secret, &new_pin_enc);
    Ok(SetPinMessage {
        new_pin_enc,
        pin_uv_auth_param,
    })
}

/// Encrypted fields of a changePIN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangePinMessage {
    pub new_pin_enc: Vec<u8>,
    pub pin_hash_enc: Vec<u8>,
    pub pin_uv_auth_param: Vec<u8>,
}

pub(crate) fn change_pin_message(
    protocol: PinUvAuthProtocol,
    shared_secret: &[u8],
    current_pin: &str,
    new_pin: &str,
) -> Result<ChangePinMessage> {
    let new_padded = prepare_pin(new_pin, true)?;
    let current_hash = pin_hash(current_pin)?;
    let pin_hash_enc = protocol.encrypt(shared_secret, &current_hash)?;
    let new_pin_enc = protocol.encrypt(shared_secret, &new_padded)?;

    // newPinEnc comes first
    let mut message = Vec::with_capacity(new_pin_enc.len() + pin_hash_enc.len());
    message.extend_from_slice(&new_pin_enc);
    message.extend_from_slice(&pin_hash_enc);
    let pin_uv_auth_param = protocol.authenticate(shared_secret, &message);
    Ok(ChangePinMessage {
        new_pin_enc,
        pin_hash_enc,
        pin_uv_auth_param,
    })
}

/// Runs the PIN/UV auth handshake over a session.
pub struct ClientPin<'a> {
    session: &'a mut Ctap2Session,
    protocol: PinUvAuthProtocol,
}

impl<'a> ClientPin<'a> {
    /// Uses `protocol` when given, otherwise the preferred protocol the authenticator
    /// supports.
    pub fn new(session: &'a mut Ctap2Session, protocol: Option<PinUvAuthProtocol>) -> Result<Self> {
        let protocol = match protocol {
            Some(protocol) => protocol,
            None => PinUvAuthProtocol::select(
                session.cached_info(),
                &session.config().pin_uv_protocols,
            )?,
        };
        debug!(version = protocol.version(), "Using PIN/UV auth protocol");
        Ok(ClientPin { session, protocol })
    }

    /// Whether the authenticator knows about PINs at all, set or not.
    pub fn is_supported(info: &InfoData) -> bool {
        info.has_option("clientPin")
    }

    /// Whether the authenticator issues permission scoped tokens.
    pub fn is_token_supported(info: &InfoData) -> bool {
        info.is_option_true("pinUvAuthToken")
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    fn params(&self, sub_command: u8) -> ClientPinParams {
        ClientPinParams::new(self.protocol.version(), sub_command)
    }

    fn require_pin_support(&self) -> Result<()> {
        if !Self::is_supported(self.session.cached_info()) {
            return Err(Error::NotSupported("ClientPIN"));
        }
        Ok(())
    }

    /// Fetches the authenticator's key agreement key and derives a fresh shared secret.
    pub async fn get_shared_secret(&mut self) -> Result<SharedSecretPair> {
        let response = self
            .session
            .client_pin(&self.params(sub_command::GET_KEY_AGREEMENT), None)
            .await?
            .ok_or_else(|| Error::bad_response("getKeyAgreement returned no data"))?;
        let peer_key = response
            .get(result::KEY_AGREEMENT)
            .ok_or_else(|| Error::bad_response("Missing keyAgreement"))?;
        Ok(self.protocol.encapsulate(peer_key)?)
    }

    async fn request_token(
        &mut self,
        mut params: ClientPinParams,
        pair: &SharedSecretPair,
        state: Option<&CommandState>,
    ) -> Result<PinUvToken> {
        params.key_agreement = Some(pair.key_agreement.clone());
        let response = self
            .session
            .client_pin(&params, state)
            .await?
            .ok_or_else(|| Error::bad_response("Token request returned no data"))?;
        let token_enc = response.require_bytes(result::PIN_UV_AUTH_TOKEN)?;
        let token = self.protocol.decrypt(&pair.shared_secret, token_enc)?;
        Ok(PinUvToken::new(self.protocol, token))
    }

    /// Exchanges a PIN for a token.
    ///
    /// Authenticators without `pinUvAuthToken` only hand out unscoped legacy tokens: the
    /// requested permissions and RP ID are then dropped, and the token is as powerful
    /// as the authenticator's legacy policy allows rather than limited to them.
    ///
    /// Authenticators with `pinUvAuthToken` get a scoped request whenever permissions
    /// are given. Without permissions they are asked for a legacy token, so an RP ID
    /// passed alone is rejected with [Error::InvalidArgument] before anything is sent.
    #[instrument(skip(self, pin))]
    pub async fn get_pin_token(
        &mut self,
        pin: &str,
        permissions: Option<Permissions>,
        rp_id: Option<&str>,
    ) -> Result<PinUvToken> {
        self.require_pin_support()?;
        let scoped = Self::is_token_supported(self.session.cached_info());
        if scoped && permissions.is_none() && rp_id.is_some() {
            return Err(Error::InvalidArgument(
                "An RP ID can only scope a token together with permissions".into(),
            ));
        }
        let pin_hash = pin_hash(pin)?;
        let pair = self.get_shared_secret().await?;
        let pin_hash_enc = self.protocol.encrypt(&pair.shared_secret, &pin_hash)?;

        let params = match permissions {
            Some(permissions) if scoped => ClientPinParams {
                pin_hash_enc: Some(pin_hash_enc),
                permissions: Some(permissions.bits()),
                rp_id: rp_id.map(str::to_owned),
                ..self.params(sub_command::GET_TOKEN_USING_PIN_WITH_PERMISSIONS)
            },
            _ => {
                if permissions.is_some() || rp_id.is_some() {
                    warn!("Authenticator only issues legacy PIN tokens, dropping requested permissions and RP ID");
                }
                ClientPinParams {
                    pin_hash_enc: Some(pin_hash_enc),
                    ..self.params(sub_command::GET_PIN_TOKEN)
                }
            }
        };
        let token = self.request_token(params, &pair, None).await?;
        debug!("Got PIN token");
        Ok(token)
    }

    /// Gets a token through the authenticator's built-in user verification, which
    /// waits for the user and can be cancelled through `state`.
    #[instrument(skip(self, state))]
    pub async fn get_uv_token(
        &mut self,
        permissions: Permissions,
        rp_id: Option<&str>,
        state: Option<&CommandState>,
    ) -> Result<PinUvToken> {
        if !Self::is_token_supported(self.session.cached_info()) {
            return Err(Error::NotSupported("pinUvAuthToken"));
        }
        let pair = self.get_shared_secret().await?;
        let params = ClientPinParams {
            permissions: Some(permissions.bits()),
            rp_id: rp_id.map(str::to_owned),
            ..self.params(sub_command::GET_TOKEN_USING_UV_WITH_PERMISSIONS)
        };
        let token = self.request_token(params, &pair, state).await?;
        debug!("Got UV token");
        Ok(token)
    }

    pub async fn get_pin_retries(&mut self) -> Result<RetryState> {
        let response = self
            .session
            .client_pin(&self.params(sub_command::GET_PIN_RETRIES), None)
            .await?
            .ok_or_else(|| Error::bad_response("getPINRetries returned no data"))?;
        Ok(RetryState {
            retries: response.require_uint(result::PIN_RETRIES)?,
            power_cycle_state: response.bool(result::POWER_CYCLE_STATE)?,
        })
    }

    pub async fn get_uv_retries(&mut self) -> Result<RetryState> {
        let response = self
            .session
            .client_pin(&self.params(sub_command::GET_UV_RETRIES), None)
            .await?
            .ok_or_else(|| Error::bad_response("getUVRetries returned no data"))?;
        Ok(RetryState {
            retries: response.require_uint(result::UV_RETRIES)?,
            power_cycle_state: None,
        })
    }

    /// Sets the first PIN of an authenticator that has none.
    #[instrument(skip_all)]
    pub async fn set_pin(&mut self, pin: &str) -> Result<()> {
        self.require_pin_support()?;
        prepare_pin(pin, false)?;
        let pair = self.get_shared_secret().await?;
        let message = set_pin_message(self.protocol, &pair.shared_secret, pin)?;
        let params = ClientPinParams {
            key_agreement: Some(pair.key_agreement.clone()),
            pin_uv_auth_param: Some(message.pin_uv_auth_param),
            new_pin_enc: Some(message.new_pin_enc),
            ..self.params(sub_command::SET_PIN)
        };
        self.session.client_pin(&params, None).await?;
        info!("PIN set");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn change_pin(&mut self, current_pin: &str, new_pin: &str) -> Result<()> {
        self.require_pin_support()?;
        prepare_pin(current_pin, false)?;
        prepare_pin(new_pin, false)?;
        let pair = self.get_shared_secret().await?;
        let message = change_pin_message(self.protocol, &pair.shared_secret, current_pin, new_pin)?;
        let params = ClientPinParams {
            key_agreement: Some(pair.key_agreement.clone()),
            pin_uv_auth_param: Some(message.pin_uv_auth_param),
            new_pin_enc: Some(message.new_pin_enc),
            pin_hash_enc: Some(message.pin_hash_enc),
            ..self.params(sub_command::CHANGE_PIN)
        };
        self.session.client_pin(&params, None).await?;
        info!("PIN changed");
        Ok(())
    }
}
