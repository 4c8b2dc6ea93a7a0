use std::collections::BTreeMap;

use ciborium::value::Value;
use modular_bitfield::bitfield;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    cbor::{args::bytes_value, pack_args, ResponseMap},
    error::{Error, Result},
};

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Value::serialized(value).map_err(|e| Error::Encoding(e.to_string()))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
    value
        .deserialized()
        .map_err(|e| Error::bad_response(e.to_string()))
}

/// https://w3c.github.io/webauthn/#dictdef-publickeycredentialrpentity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyCredentialRpEntity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// https://w3c.github.io/webauthn/#dictdef-publickeycredentialuserentity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyCredentialUserEntity {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "displayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
}

/// https://w3c.github.io/webauthn/#dictdef-publickeycredentialparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

impl PublicKeyCredentialParameters {
    pub fn public_key(alg: i64) -> Self {
        PublicKeyCredentialParameters {
            type_: "public-key".into(),
            alg,
        }
    }
}

/// https://w3c.github.io/webauthn/#dictdef-publickeycredentialdescriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    pub fn public_key(id: Vec<u8>) -> Self {
        PublicKeyCredentialDescriptor {
            type_: "public-key".into(),
            id,
            transports: None,
        }
    }
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
/// [See more](https://www.w3.org/TR/webauthn/#authenticator-data)
pub struct AuthenticatorDataFlags {
    pub user_present: bool,
    #[skip]
    rfu_1: bool,
    pub user_verified: bool,
    pub backup_eligible: bool,
    pub backed_up: bool,
    #[skip]
    rfu_2: bool,
    pub attested_data_included: bool,
    pub extension_data_included: bool,
}

/// The fixed prefix of authenticator data, attested credential data and extensions
/// are kept undecoded.
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: AuthenticatorDataFlags,
    pub counter: u32,
    pub rest: Vec<u8>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 37 {
            return Err(Error::bad_response("Authenticator data is too short"));
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        Ok(AuthenticatorData {
            rp_id_hash,
            flags: AuthenticatorDataFlags::from_bytes([data[32]]),
            counter: u32::from_be_bytes([data[33], data[34], data[35], data[36]]),
            rest: data[37..].to_vec(),
        })
    }
}

/// https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorMakeCredential
#[derive(Debug, Clone, Default)]
pub struct MakeCredentialParams {
    pub client_data_hash: Vec<u8>,
    pub rp: Option<PublicKeyCredentialRpEntity>,
    pub user: Option<PublicKeyCredentialUserEntity>,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Option<Vec<PublicKeyCredentialDescriptor>>,
    pub extensions: Option<BTreeMap<String, Value>>,
    pub options: Option<BTreeMap<String, bool>>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub pin_uv_auth_protocol: Option<u8>,
    pub enterprise_attestation: Option<u64>,
}

fn text_map<T: Clone + Into<Value>>(map: &BTreeMap<String, T>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::Text(k.clone()), v.clone().into()))
            .collect(),
    )
}

impl MakeCredentialParams {
    pub(crate) fn to_args(&self) -> Result<Value> {
        Ok(pack_args([
            Some(bytes_value(&self.client_data_hash)),
            self.rp.as_ref().map(to_value).transpose()?,
            self.user.as_ref().map(to_value).transpose()?,
            Some(to_value(&self.pub_key_cred_params)?),
            self.exclude_list.as_ref().map(to_value).transpose()?,
            self.extensions.as_ref().map(text_map),
            self.options.as_ref().map(text_map),
            self.pin_uv_auth_param.as_deref().map(bytes_value),
            self.pin_uv_auth_protocol.map(Value::from),
            self.enterprise_attestation.map(Value::from),
        ]))
    }
}

/// https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorGetAssertion
#[derive(Debug, Clone, Default)]
pub struct GetAssertionParams {
    pub rp_id: String,
    pub client_data_hash: Vec<u8>,
    pub allow_list: Option<Vec<PublicKeyCredentialDescriptor>>,
    pub extensions: Option<BTreeMap<String, Value>>,
    pub options: Option<BTreeMap<String, bool>>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub pin_uv_auth_protocol: Option<u8>,
}

impl GetAssertionParams {
    pub(crate) fn to_args(&self) -> Result<Value> {
        Ok(pack_args([
            Some(Value::Text(self.rp_id.clone())),
            Some(bytes_value(&self.client_data_hash)),
            self.allow_list.as_ref().map(to_value).transpose()?,
            self.extensions.as_ref().map(text_map),
            self.options.as_ref().map(text_map),
            self.pin_uv_auth_param.as_deref().map(bytes_value),
            self.pin_uv_auth_protocol.map(Value::from),
        ]))
    }
}

/// https://www.w3.org/TR/webauthn/#attestation-object
#[derive(Debug, Clone)]
pub struct AttestationResponse {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: Value,
    pub ep_att: Option<bool>,
    pub large_blob_key: Option<Vec<u8>>,
}

impl AttestationResponse {
    pub fn from_response(response: &ResponseMap) -> Result<Self> {
        Ok(AttestationResponse {
            fmt: response
                .text(0x01)?
                .ok_or_else(|| Error::bad_response("Missing attestation format"))?
                .to_owned(),
            auth_data: response.require_bytes(0x02)?.to_vec(),
            att_stmt: response.get(0x03).cloned().unwrap_or(Value::Map(vec![])),
            ep_att: response.bool(0x04)?,
            large_blob_key: response.bytes(0x05)?.map(<[u8]>::to_vec),
        })
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::parse(&self.auth_data)
    }
}

#[derive(Debug, Clone)]
pub struct AssertionResponse {
    pub credential: Option<PublicKeyCredentialDescriptor>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: Option<PublicKeyCredentialUserEntity>,
    pub number_of_credentials: Option<u64>,
    pub user_selected: Option<bool>,
    pub large_blob_key: Option<Vec<u8>>,
}

impl AssertionResponse {
    pub fn from_response(response: &ResponseMap) -> Result<Self> {
        Ok(AssertionResponse {
            credential: response.get(0x01).map(from_value).transpose()?,
            auth_data: response.require_bytes(0x02)?.to_vec(),
            signature: response.require_bytes(0x03)?.to_vec(),
            user: response.get(0x04).map(from_value).transpose()?,
            number_of_credentials: response.uint(0x05)?,
            user_selected: response.bool(0x06)?,
            large_blob_key: response.bytes(0x07)?.map(<[u8]>::to_vec),
        })
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::parse(&self.auth_data)
    }
}
