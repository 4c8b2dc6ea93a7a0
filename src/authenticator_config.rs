//! authenticatorConfig: authenticator wide settings.

use ciborium::value::Value;
use tracing::{info, instrument};

use crate::{
    cbor::{pack_args, to_canonical_vec, ResponseMap},
    client_pin::PinUvToken,
    ctap::{info::InfoData, params::SubCommandParams, session::Ctap2Session},
    error::{Error, Result},
};

mod sub_command {
    pub const ENABLE_ENTERPRISE_ATTESTATION: u8 = 0x01;
    pub const TOGGLE_ALWAYS_UV: u8 = 0x02;
    pub const SET_MIN_PIN_LENGTH: u8 = 0x03;
    pub const VENDOR_PROTOTYPE: u8 = 0xFF;
}

/// Prefix of every signed config message: 32 bytes of 0xff, then the command byte.
const AUTH_PREFIX_LEN: usize = 32;
const CONFIG_COMMAND: u8 = 0x0d;

pub struct AuthenticatorConfig<'a> {
    session: &'a mut Ctap2Session,
    token: Option<PinUvToken>,
}

impl<'a> AuthenticatorConfig<'a> {
    pub fn is_supported(info: &InfoData) -> bool {
        info.is_option_true("authnrCfg")
    }

    /// Commands are sent unauthenticated without a token, which authenticators only
    /// accept while no PIN is set and UV is not configured.
    pub fn new(session: &'a mut Ctap2Session, token: Option<PinUvToken>) -> Result<Self> {
        if !Self::is_supported(session.cached_info()) {
            return Err(Error::NotSupported("Authenticator config"));
        }
        Ok(AuthenticatorConfig { session, token })
    }

    async fn call(
        &mut self,
        sub_command: u8,
        sub_command_params: Option<Value>,
    ) -> Result<Option<ResponseMap>> {
        let mut params = SubCommandParams {
            sub_command,
            ..Default::default()
        };
        if let Some(token) = &self.token {
            let mut message = vec![0xff; AUTH_PREFIX_LEN];
            message.push(CONFIG_COMMAND);
            message.push(sub_command);
            if let Some(sub_command_params) = &sub_command_params {
                message.extend(to_canonical_vec(sub_command_params.clone())?);
            }
            params.pin_uv_auth_protocol = Some(token.protocol().version());
            params.pin_uv_auth_param = Some(token.authenticate(&message));
        }
        params.sub_command_params = sub_command_params;
        self.session.authenticator_config(&params).await
    }

    #[instrument(skip(self))]
    pub async fn enable_enterprise_attestation(&mut self) -> Result<()> {
        self.call(sub_command::ENABLE_ENTERPRISE_ATTESTATION, None)
            .await?;
        info!("Enterprise attestation enabled");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn toggle_always_uv(&mut self) -> Result<()> {
        self.call(sub_command::TOGGLE_ALWAYS_UV, None).await?;
        info!("Always UV toggled");
        Ok(())
    }

    /// Raises the minimum PIN length, and lists the RP IDs allowed to read it through
    /// the minPinLength extension.
    #[instrument(skip(self))]
    pub async fn set_min_pin_length(
        &mut self,
        min_pin_length: Option<u64>,
        rp_ids: Option<&[String]>,
        force_change_pin: bool,
    ) -> Result<()> {
        let params = pack_args([
            min_pin_length.map(Value::from),
            rp_ids.map(|ids| Value::Array(ids.iter().cloned().map(Value::Text).collect())),
            Some(Value::Bool(force_change_pin)),
        ]);
        self.call(sub_command::SET_MIN_PIN_LENGTH, Some(params))
            .await?;
        info!(?min_pin_length, force_change_pin, "Minimum PIN length updated");
        Ok(())
    }

    /// Sends a vendor specific command, returning whatever the authenticator answers.
    #[instrument(skip(self))]
    pub async fn vendor_prototype(&mut self, vendor_command_id: u64) -> Result<Option<ResponseMap>> {
        let params = pack_args([Some(Value::from(vendor_command_id))]);
        self.call(sub_command::VENDOR_PROTOTYPE, Some(params)).await
    }
}
