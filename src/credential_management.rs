//! authenticatorCredentialManagement: inspecting and editing discoverable credentials.

use ciborium::value::Value;
use tracing::{debug, info, instrument};

use crate::{
    cbor::{args::bytes_value, pack_args, to_canonical_vec, ResponseMap},
    client_pin::PinUvToken,
    ctap::{
        command::StatusCode,
        info::{InfoData, FIDO_2_1_PRE},
        params::SubCommandParams,
        session::Ctap2Session,
        types::{
            from_value, to_value, PublicKeyCredentialDescriptor, PublicKeyCredentialRpEntity,
            PublicKeyCredentialUserEntity,
        },
    },
    error::{Error, Result},
};

mod sub_command {
    pub const GET_CREDS_METADATA: u8 = 0x01;
    pub const ENUMERATE_RPS_BEGIN: u8 = 0x02;
    pub const ENUMERATE_RPS_NEXT: u8 = 0x03;
    pub const ENUMERATE_CREDENTIALS_BEGIN: u8 = 0x04;
    pub const ENUMERATE_CREDENTIALS_NEXT: u8 = 0x05;
    pub const DELETE_CREDENTIAL: u8 = 0x06;
    pub const UPDATE_USER_INFORMATION: u8 = 0x07;
}

mod result {
    pub const EXISTING_RESIDENT_CREDENTIALS_COUNT: u64 = 0x01;
    pub const MAX_POSSIBLE_REMAINING_RESIDENT_CREDENTIALS_COUNT: u64 = 0x02;
    pub const RP: u64 = 0x03;
    pub const RP_ID_HASH: u64 = 0x04;
    pub const TOTAL_RPS: u64 = 0x05;
    pub const USER: u64 = 0x06;
    pub const CREDENTIAL_ID: u64 = 0x07;
    pub const PUBLIC_KEY: u64 = 0x08;
    pub const TOTAL_CREDENTIALS: u64 = 0x09;
    pub const CRED_PROTECT: u64 = 0x0A;
    pub const LARGE_BLOB_KEY: u64 = 0x0B;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialsMetadata {
    pub existing_resident_credentials_count: u64,
    pub max_possible_remaining_resident_credentials_count: u64,
}

/// A relying party with discoverable credentials on the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub rp: PublicKeyCredentialRpEntity,
    pub rp_id_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialInfo {
    pub user: PublicKeyCredentialUserEntity,
    pub credential_id: PublicKeyCredentialDescriptor,
    /// COSE_Key of the credential.
    pub public_key: Value,
    pub cred_protect: Option<u64>,
    pub large_blob_key: Option<Vec<u8>>,
}

impl CredentialInfo {
    fn from_response(response: &ResponseMap) -> Result<Self> {
        let required = |key: u64, what: &str| {
            response
                .get(key)
                .ok_or_else(|| Error::bad_response(format!("Missing {}", what)))
        };
        Ok(CredentialInfo {
            user: from_value(required(result::USER, "user")?)?,
            credential_id: from_value(required(result::CREDENTIAL_ID, "credentialID")?)?,
            public_key: required(result::PUBLIC_KEY, "publicKey")?.clone(),
            cred_protect: response.uint(result::CRED_PROTECT)?,
            large_blob_key: response.bytes(result::LARGE_BLOB_KEY)?.map(<[u8]>::to_vec),
        })
    }
}

/// Credential management authorized by a token with the credential management
/// permission.
pub struct CredentialManagement<'a> {
    session: &'a mut Ctap2Session,
    token: PinUvToken,
}

impl<'a> CredentialManagement<'a> {
    pub fn is_supported(info: &InfoData) -> bool {
        info.is_option_true("credMgmt")
            || (info.supports_version(FIDO_2_1_PRE)
                && info.is_option_true("credentialMgmtPreview"))
    }

    pub fn new(session: &'a mut Ctap2Session, token: PinUvToken) -> Result<Self> {
        if !Self::is_supported(session.cached_info()) {
            return Err(Error::NotSupported("Credential management"));
        }
        Ok(CredentialManagement { session, token })
    }

    /// Sends a sub-command, signing `subCommand || params` unless `signed` is unset.
    async fn call(
        &mut self,
        sub_command: u8,
        sub_command_params: Option<Value>,
        signed: bool,
    ) -> Result<Option<ResponseMap>> {
        let mut params = SubCommandParams {
            sub_command,
            ..Default::default()
        };
        if signed {
            let mut message = vec![sub_command];
            if let Some(sub_command_params) = &sub_command_params {
                message.extend(to_canonical_vec(sub_command_params.clone())?);
            }
            params.pin_uv_auth_protocol = Some(self.token.protocol().version());
            params.pin_uv_auth_param = Some(self.token.authenticate(&message));
        }
        params.sub_command_params = sub_command_params;
        self.session.credential_management(&params).await
    }

    async fn call_expecting_data(
        &mut self,
        sub_command: u8,
        sub_command_params: Option<Value>,
        signed: bool,
    ) -> Result<ResponseMap> {
        self.call(sub_command, sub_command_params, signed)
            .await?
            .ok_or_else(|| {
                Error::bad_response(format!("Sub-command 0x{:02x} returned no data", sub_command))
            })
    }

    pub async fn get_metadata(&mut self) -> Result<CredentialsMetadata> {
        let response = self
            .call_expecting_data(sub_command::GET_CREDS_METADATA, None, true)
            .await?;
        Ok(CredentialsMetadata {
            existing_resident_credentials_count: response
                .require_uint(result::EXISTING_RESIDENT_CREDENTIALS_COUNT)?,
            max_possible_remaining_resident_credentials_count: response
                .require_uint(result::MAX_POSSIBLE_REMAINING_RESIDENT_CREDENTIALS_COUNT)?,
        })
    }

    fn relying_party(response: &ResponseMap) -> Result<RelyingParty> {
        let rp = response
            .get(result::RP)
            .ok_or_else(|| Error::bad_response("Missing rp"))?;
        Ok(RelyingParty {
            rp: from_value(rp)?,
            rp_id_hash: response.require_bytes(result::RP_ID_HASH)?.to_vec(),
        })
    }

    /// Lists every relying party that has discoverable credentials.
    #[instrument(skip(self))]
    pub async fn enumerate_rps(&mut self) -> Result<Vec<RelyingParty>> {
        let first = match self
            .call(sub_command::ENUMERATE_RPS_BEGIN, None, true)
            .await
        {
            Ok(Some(first)) => first,
            Ok(None) => return Ok(Vec::new()),
            Err(Error::Ctap(e)) if e.is(StatusCode::Ctap2ErrNoCredentials) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let total = first.uint(result::TOTAL_RPS)?.unwrap_or(0);
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut rps = vec![Self::relying_party(&first)?];
        for _ in 1..total {
            let next = self
                .call_expecting_data(sub_command::ENUMERATE_RPS_NEXT, None, false)
                .await?;
            rps.push(Self::relying_party(&next)?);
        }
        debug!(count = rps.len(), "Enumerated relying parties");
        Ok(rps)
    }

    /// Lists the discoverable credentials of the relying party with `rp_id_hash`.
    #[instrument(skip_all)]
    pub async fn enumerate_credentials(&mut self, rp_id_hash: &[u8]) -> Result<Vec<CredentialInfo>> {
        let params = pack_args([Some(bytes_value(rp_id_hash))]);
        let first = match self
            .call_expecting_data(sub_command::ENUMERATE_CREDENTIALS_BEGIN, Some(params), true)
            .await
        {
            Ok(first) => first,
            Err(Error::Ctap(e)) if e.is(StatusCode::Ctap2ErrNoCredentials) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let total = first.uint(result::TOTAL_CREDENTIALS)?.unwrap_or(1);

        let mut credentials = vec![CredentialInfo::from_response(&first)?];
        for _ in 1..total {
            let next = self
                .call_expecting_data(sub_command::ENUMERATE_CREDENTIALS_NEXT, None, false)
                .await?;
            credentials.push(CredentialInfo::from_response(&next)?);
        }
        debug!(count = credentials.len(), "Enumerated credentials");
        Ok(credentials)
    }

    #[instrument(skip_all)]
    pub async fn delete_credential(
        &mut self,
        credential_id: &PublicKeyCredentialDescriptor,
    ) -> Result<()> {
        let params = pack_args([None, Some(to_value(credential_id)?)]);
        self.call(sub_command::DELETE_CREDENTIAL, Some(params), true)
            .await?;
        info!(credential_id = %hex::encode(&credential_id.id), "Credential deleted");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn update_user_information(
        &mut self,
        credential_id: &PublicKeyCredentialDescriptor,
        user: &PublicKeyCredentialUserEntity,
    ) -> Result<()> {
        let params = pack_args([None, Some(to_value(credential_id)?), Some(to_value(user)?)]);
        self.call(sub_command::UPDATE_USER_INFORMATION, Some(params), true)
            .await?;
        info!(credential_id = %hex::encode(&credential_id.id), "Credential user updated");
        Ok(())
    }
}
