use ciborium::value::Value;
use coset::{iana, AsCborValue, CoseKey, CoseKeyBuilder, KeyType, Label};

use super::CryptoError;
use crate::cbor::args::value_to_u64;

const COORDINATE_LEN: usize = 32;

/// Wraps an uncompressed SEC1 P-256 point (`0x04 || x || y`) as the COSE_Key sent
/// in `keyAgreement`.
pub fn key_agreement_from_point(point: &[u8]) -> Result<Value, CryptoError> {
    ec2_key_from_point(point, iana::Algorithm::ECDH_ES_HKDF_256)
}

/// COSE_Key of an uncompressed P-256 point, tagged with `algorithm`.
pub fn ec2_key_from_point(point: &[u8], algorithm: iana::Algorithm) -> Result<Value, CryptoError> {
    if point.len() != 1 + 2 * COORDINATE_LEN || point[0] != 0x04 {
        return Err(CryptoError::InvalidPeerKey(
            "Public key must be an uncompressed P-256 point".into(),
        ));
    }
    let (x, y) = point[1..].split_at(COORDINATE_LEN);
    CoseKeyBuilder::new_ec2_pub_key(iana::EllipticCurve::P_256, x.to_owned(), y.to_owned())
        .algorithm(algorithm)
        .build()
        .to_cbor_value()
        .map_err(|e| CryptoError::InvalidPeerKey(format!("{:?}", e)))
}

fn ec2_param(key: &CoseKey, param: iana::Ec2KeyParameter) -> Option<&Value> {
    let label = Label::Int(param as i64);
    key.params
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, v)| v)
}

/// Reads the authenticator's COSE_Key back into an uncompressed SEC1 point.
pub fn point_from_key_agreement(key: &Value) -> Result<Vec<u8>, CryptoError> {
    let key = CoseKey::from_cbor_value(key.clone())
        .map_err(|e| CryptoError::InvalidPeerKey(format!("{:?}", e)))?;
    if key.kty != KeyType::Assigned(iana::KeyType::EC2) {
        return Err(CryptoError::InvalidPeerKey(format!(
            "Unexpected key type {:?}",
            key.kty
        )));
    }
    let curve = ec2_param(&key, iana::Ec2KeyParameter::Crv).and_then(value_to_u64);
    if curve != Some(iana::EllipticCurve::P_256 as u64) {
        return Err(CryptoError::InvalidPeerKey(format!(
            "Unexpected curve {:?}",
            curve
        )));
    }
    let coordinate = |param| {
        ec2_param(&key, param)
            .and_then(Value::as_bytes)
            .filter(|c| c.len() == COORDINATE_LEN)
            .ok_or_else(|| CryptoError::InvalidPeerKey(format!("Bad {:?} coordinate", param)))
    };
    let x = coordinate(iana::Ec2KeyParameter::X)?;
    let y = coordinate(iana::Ec2KeyParameter::Y)?;

    let mut point = Vec::with_capacity(1 + 2 * COORDINATE_LEN);
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    Ok(point)
}
