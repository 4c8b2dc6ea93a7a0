use std::collections::BTreeMap;

use ciborium::value::Value;
use super::types::{from_value, PublicKeyCredentialParameters};
use crate::{
    cbor::{args::value_to_u64, ResponseMap},
    error::{Error, Result},
};

pub const FIDO_2_0: &str = "FIDO_2_0";
pub const FIDO_2_1_PRE: &str = "FIDO_2_1_PRE";
pub const FIDO_2_1: &str = "FIDO_2_1";
pub const U2F_V2: &str = "U2F_V2";

const DEFAULT_MAX_MSG_SIZE: u64 = 1024;
const DEFAULT_MIN_PIN_LENGTH: u64 = 4;

mod key {
    pub const VERSIONS: u64 = 0x01;
    pub const EXTENSIONS: u64 = 0x02;
    pub const AAGUID: u64 = 0x03;
    pub const OPTIONS: u64 = 0x04;
    pub const MAX_MSG_SIZE: u64 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: u64 = 0x06;
    pub const MAX_CREDENTIAL_COUNT_IN_LIST: u64 = 0x07;
    pub const MAX_CREDENTIAL_ID_LENGTH: u64 = 0x08;
    pub const TRANSPORTS: u64 = 0x09;
    pub const ALGORITHMS: u64 = 0x0A;
    pub const MAX_SERIALIZED_LARGE_BLOB_ARRAY: u64 = 0x0B;
    pub const FORCE_PIN_CHANGE: u64 = 0x0C;
    pub const MIN_PIN_LENGTH: u64 = 0x0D;
    pub const FIRMWARE_VERSION: u64 = 0x0E;
    pub const MAX_CRED_BLOB_LENGTH: u64 = 0x0F;
    pub const MAX_RPIDS_FOR_SET_MIN_PIN_LENGTH: u64 = 0x10;
    pub const PREFERRED_PLATFORM_UV_ATTEMPTS: u64 = 0x11;
    pub const UV_MODALITY: u64 = 0x12;
    pub const CERTIFICATIONS: u64 = 0x13;
    pub const REMAINING_DISCOVERABLE_CREDENTIALS: u64 = 0x14;
    pub const VENDOR_PROTOTYPE_CONFIG_COMMANDS: u64 = 0x15;
}

/// Capabilities reported by `authenticatorGetInfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoData {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    pub options: BTreeMap<String, bool>,
    pub max_msg_size: u64,
    pub pin_uv_auth_protocols: Vec<u64>,
    pub max_credential_count_in_list: Option<u64>,
    pub max_credential_id_length: Option<u64>,
    pub transports: Vec<String>,
    pub algorithms: Vec<PublicKeyCredentialParameters>,
    pub max_serialized_large_blob_array: Option<u64>,
    pub force_pin_change: bool,
    pub min_pin_length: u64,
    pub firmware_version: Option<u64>,
    pub max_cred_blob_length: Option<u64>,
    pub max_rpids_for_set_min_pin_length: Option<u64>,
    pub preferred_platform_uv_attempts: Option<u64>,
    pub uv_modality: Option<u64>,
    pub certifications: BTreeMap<String, u64>,
    pub remaining_discoverable_credentials: Option<u64>,
    pub vendor_prototype_config_commands: Vec<u64>,
}

impl Default for InfoData {
    fn default() -> Self {
        InfoData {
            versions: Vec::new(),
            extensions: Vec::new(),
            aaguid: [0; 16],
            options: BTreeMap::new(),
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            pin_uv_auth_protocols: Vec::new(),
            max_credential_count_in_list: None,
            max_credential_id_length: None,
            transports: Vec::new(),
            algorithms: Vec::new(),
            max_serialized_large_blob_array: None,
            force_pin_change: false,
            min_pin_length: DEFAULT_MIN_PIN_LENGTH,
            firmware_version: None,
            max_cred_blob_length: None,
            max_rpids_for_set_min_pin_length: None,
            preferred_platform_uv_attempts: None,
            uv_modality: None,
            certifications: BTreeMap::new(),
            remaining_discoverable_credentials: None,
            vendor_prototype_config_commands: Vec::new(),
        }
    }
}

fn text_keyed<T>(
    entries: &[(Value, Value)],
    field: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<BTreeMap<String, T>> {
    entries
        .iter()
        .map(|(k, v)| match (k.as_text(), convert(v)) {
            (Some(k), Some(v)) => Ok((k.to_owned(), v)),
            _ => Err(Error::bad_response(format!(
                "Unexpected {} entry {:?} => {:?}",
                field, k, v
            ))),
        })
        .collect()
}

fn uint_list(response: &ResponseMap, key: u64) -> Result<Vec<u64>> {
    response
        .array(key)?
        .unwrap_or_default()
        .iter()
        .map(|v| {
            value_to_u64(v).ok_or_else(|| {
                Error::bad_response(format!("Field 0x{:02x} should only hold integers", key))
            })
        })
        .collect()
}

impl InfoData {
    pub fn from_response(response: &ResponseMap) -> Result<Self> {
        let defaults = InfoData::default();
        let aaguid = match response.bytes(key::AAGUID)? {
            Some(aaguid) => <[u8; 16]>::try_from(aaguid)
                .map_err(|_| Error::bad_response("AAGUID must be 16 bytes"))?,
            None => defaults.aaguid,
        };
        let options = match response.map(key::OPTIONS)? {
            Some(options) => text_keyed(options, "options", Value::as_bool)?,
            None => defaults.options,
        };
        let certifications = match response.map(key::CERTIFICATIONS)? {
            Some(certs) => text_keyed(certs, "certifications", value_to_u64)?,
            None => defaults.certifications,
        };
        let algorithms = response
            .array(key::ALGORITHMS)?
            .unwrap_or_default()
            .iter()
            .map(from_value)
            .collect::<Result<Vec<PublicKeyCredentialParameters>>>()?;

        Ok(InfoData {
            versions: response.text_list(key::VERSIONS)?,
            extensions: response.text_list(key::EXTENSIONS)?,
            aaguid,
            options,
            max_msg_size: response
                .uint(key::MAX_MSG_SIZE)?
                .unwrap_or(defaults.max_msg_size),
            pin_uv_auth_protocols: uint_list(response, key::PIN_UV_AUTH_PROTOCOLS)?,
            max_credential_count_in_list: response.uint(key::MAX_CREDENTIAL_COUNT_IN_LIST)?,
            max_credential_id_length: response.uint(key::MAX_CREDENTIAL_ID_LENGTH)?,
            transports: response.text_list(key::TRANSPORTS)?,
            algorithms,
            max_serialized_large_blob_array: response
                .uint(key::MAX_SERIALIZED_LARGE_BLOB_ARRAY)?,
            force_pin_change: response.bool(key::FORCE_PIN_CHANGE)?.unwrap_or(false),
            min_pin_length: response
                .uint(key::MIN_PIN_LENGTH)?
                .unwrap_or(defaults.min_pin_length),
            firmware_version: response.uint(key::FIRMWARE_VERSION)?,
            max_cred_blob_length: response.uint(key::MAX_CRED_BLOB_LENGTH)?,
            max_rpids_for_set_min_pin_length: response
                .uint(key::MAX_RPIDS_FOR_SET_MIN_PIN_LENGTH)?,
            preferred_platform_uv_attempts: response.uint(key::PREFERRED_PLATFORM_UV_ATTEMPTS)?,
            uv_modality: response.uint(key::UV_MODALITY)?,
            certifications,
            remaining_discoverable_credentials: response
                .uint(key::REMAINING_DISCOVERABLE_CREDENTIALS)?,
            vendor_prototype_config_commands: uint_list(
                response,
                key::VENDOR_PROTOTYPE_CONFIG_COMMANDS,
            )?,
        })
    }

    /// The value of an option, `None` when the authenticator doesn't list it.
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn is_option_true(&self, name: &str) -> bool {
        self.option(name) == Some(true)
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}
