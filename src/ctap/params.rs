//! Parameter sets of the management commands, packed positionally on the wire.

use ciborium::value::Value;

use crate::cbor::{args::bytes_value, pack_args};

/// authenticatorClientPIN parameters.
#[derive(Debug, Clone, Default)]
pub struct ClientPinParams {
    pub pin_uv_auth_protocol: Option<u8>,
    pub sub_command: u8,
    pub key_agreement: Option<Value>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub new_pin_enc: Option<Vec<u8>>,
    pub pin_hash_enc: Option<Vec<u8>>,
    pub permissions: Option<u8>,
    pub rp_id: Option<String>,
}

impl ClientPinParams {
    pub fn new(pin_uv_auth_protocol: u8, sub_command: u8) -> Self {
        ClientPinParams {
            pin_uv_auth_protocol: Some(pin_uv_auth_protocol),
            sub_command,
            ..Default::default()
        }
    }

    pub(crate) fn to_args(&self) -> Value {
        pack_args([
            self.pin_uv_auth_protocol.map(Value::from),
            Some(Value::from(self.sub_command)),
            self.key_agreement.clone(),
            self.pin_uv_auth_param.as_deref().map(bytes_value),
            self.new_pin_enc.as_deref().map(bytes_value),
            self.pin_hash_enc.as_deref().map(bytes_value),
            // 0x07 and 0x08 are unassigned
            None,
            None,
            self.permissions.map(Value::from),
            self.rp_id.clone().map(Value::Text),
        ])
    }
}

/// authenticatorBioEnrollment parameters.
#[derive(Debug, Clone, Default)]
pub struct BioEnrollmentParams {
    pub modality: Option<u8>,
    pub sub_command: Option<u8>,
    pub sub_command_params: Option<Value>,
    pub pin_uv_auth_protocol: Option<u8>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub get_modality: Option<bool>,
}

impl BioEnrollmentParams {
    pub(crate) fn to_args(&self) -> Value {
        pack_args([
            self.modality.map(Value::from),
            self.sub_command.map(Value::from),
            self.sub_command_params.clone(),
            self.pin_uv_auth_protocol.map(Value::from),
            self.pin_uv_auth_param.as_deref().map(bytes_value),
            self.get_modality.map(Value::Bool),
        ])
    }
}

/// Parameters shared by authenticatorCredentialManagement and authenticatorConfig.
#[derive(Debug, Clone, Default)]
pub struct SubCommandParams {
    pub sub_command: u8,
    pub sub_command_params: Option<Value>,
    pub pin_uv_auth_protocol: Option<u8>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
}

impl SubCommandParams {
    pub(crate) fn to_args(&self) -> Value {
        pack_args([
            Some(Value::from(self.sub_command)),
            self.sub_command_params.clone(),
            self.pin_uv_auth_protocol.map(Value::from),
            self.pin_uv_auth_param.as_deref().map(bytes_value),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::ResponseMap;

    #[test]
    fn test_client_pin_permissions_use_key_9() {
        let params = ClientPinParams {
            permissions: Some(0x08),
            rp_id: Some("example.com".into()),
            ..ClientPinParams::new(2, 0x09)
        };
        let args = ResponseMap::from_value(params.to_args()).unwrap();
        assert_eq!(args.len(), 4);
        assert_eq!(args.require_uint(1).unwrap(), 2);
        assert_eq!(args.require_uint(2).unwrap(), 9);
        assert_eq!(args.require_uint(9).unwrap(), 8);
        assert_eq!(args.text(10).unwrap(), Some("example.com"));
    }

    #[test]
    fn test_bio_get_modality_only() {
        let params = BioEnrollmentParams {
            get_modality: Some(true),
            ..Default::default()
        };
        let args = ResponseMap::from_value(params.to_args()).unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args.bool(6).unwrap(), Some(true));
    }
}
