use ciborium::value::Value;
use coset::iana;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};

use crate::{
    cbor::to_canonical_vec,
    crypto::{cose, CryptoError},
    ctap::types::{AttestationResponse, AuthenticatorDataFlags},
    error::{Error, Result},
};

const RESERVED_BYTE: u8 = 0x05;
const PUBLIC_KEY_LEN: usize = 65;
const USER_PRESENCE: u8 = 0x01;

const DER_SEQUENCE: u8 = 0x30;
const DER_BIT_STRING: u8 = 0x03;
const DER_EXPLICIT_VERSION: u8 = 0xa0;

/// Response to a U2F register request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationData {
    /// Uncompressed P-256 point of the new credential.
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    /// DER encoded X.509 attestation certificate.
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RegistrationData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&reserved, rest) = data
            .split_first()
            .ok_or_else(|| Error::bad_response("Empty registration data"))?;
        if reserved != RESERVED_BYTE {
            return Err(Error::bad_response(format!(
                "Registration data starts with 0x{:02x} instead of 0x05",
                reserved
            )));
        }
        if rest.len() < PUBLIC_KEY_LEN + 1 {
            return Err(Error::bad_response("Registration data is too short"));
        }
        let (public_key, rest) = rest.split_at(PUBLIC_KEY_LEN);
        let (&key_handle_len, rest) = rest
            .split_first()
            .ok_or_else(|| Error::bad_response("Missing key handle length"))?;
        let key_handle_len = usize::from(key_handle_len);
        if rest.len() < key_handle_len {
            return Err(Error::bad_response("Key handle is truncated"));
        }
        let (key_handle, rest) = rest.split_at(key_handle_len);
        let certificate_len = certificate_len(rest)
            .ok_or_else(|| Error::bad_response("Malformed attestation certificate"))?;
        let (certificate, signature) = rest.split_at(certificate_len);
        Ok(RegistrationData {
            public_key: public_key.to_vec(),
            key_handle: key_handle.to_vec(),
            certificate: certificate.to_vec(),
            signature: signature.to_vec(),
        })
    }

    /// Bytes covered by the attestation signature.
    pub fn signed_data(&self, app_param: &[u8; 32], client_param: &[u8; 32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            1 + 64 + self.key_handle.len() + self.public_key.len(),
        );
        data.push(0x00);
        data.extend_from_slice(app_param);
        data.extend_from_slice(client_param);
        data.extend_from_slice(&self.key_handle);
        data.extend_from_slice(&self.public_key);
        data
    }

    /// Checks the attestation signature with the P-256 key of the attestation
    /// certificate. The certificate itself is not validated.
    pub fn verify(&self, app_param: &[u8; 32], client_param: &[u8; 32]) -> Result<()> {
        let key = certificate_public_key(&self.certificate)
            .ok_or_else(|| Error::bad_response("Cannot find the attestation certificate key"))?;
        verify_p256(key, &self.signed_data(app_param, client_param), &self.signature)
    }

    /// The registration as the `fido-u2f` attestation object a CTAP2 authenticator
    /// would have produced.
    pub fn to_attestation(&self, app_param: &[u8; 32]) -> Result<AttestationResponse> {
        let credential_key = cose::ec2_key_from_point(&self.public_key, iana::Algorithm::ES256)?;
        let credential_id_len = u16::try_from(self.key_handle.len())
            .map_err(|_| Error::Encoding("Key handle is too long".into()))?;
        let flags = AuthenticatorDataFlags::new()
            .with_user_present(true)
            .with_attested_data_included(true);

        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(app_param);
        auth_data.extend_from_slice(&flags.into_bytes());
        auth_data.extend_from_slice(&0u32.to_be_bytes());
        // U2F authenticators have no AAGUID
        auth_data.extend_from_slice(&[0u8; 16]);
        auth_data.extend_from_slice(&credential_id_len.to_be_bytes());
        auth_data.extend_from_slice(&self.key_handle);
        auth_data.extend(to_canonical_vec(credential_key)?);

        Ok(AttestationResponse {
            fmt: "fido-u2f".into(),
            auth_data,
            att_stmt: Value::Map(vec![
                (Value::Text("sig".into()), Value::Bytes(self.signature.clone())),
                (
                    Value::Text("x5c".into()),
                    Value::Array(vec![Value::Bytes(self.certificate.clone())]),
                ),
            ]),
            ep_att: None,
            large_blob_key: None,
        })
    }
}

/// Response to a U2F authenticate request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureData {
    pub user_presence: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl SignatureData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::bad_response("Signature data is too short"));
        }
        Ok(SignatureData {
            user_presence: data[0],
            counter: u32::from_be_bytes([data[1], data[2], data[3], data[4]]),
            signature: data[5..].to_vec(),
        })
    }

    pub fn is_user_present(&self) -> bool {
        self.user_presence & USER_PRESENCE != 0
    }

    pub fn signed_data(&self, app_param: &[u8; 32], client_param: &[u8; 32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 1 + 4 + 32);
        data.extend_from_slice(app_param);
        data.push(self.user_presence);
        data.extend_from_slice(&self.counter.to_be_bytes());
        data.extend_from_slice(client_param);
        data
    }

    /// Checks the signature against the credential key from [RegistrationData::public_key].
    pub fn verify(
        &self,
        app_param: &[u8; 32],
        client_param: &[u8; 32],
        public_key: &[u8],
    ) -> Result<()> {
        if public_key.len() != PUBLIC_KEY_LEN || public_key[0] != 0x04 {
            return Err(Error::InvalidArgument(
                "Public key must be an uncompressed P-256 point".into(),
            ));
        }
        verify_p256(
            public_key,
            &self.signed_data(app_param, client_param),
            &self.signature,
        )
    }
}

fn verify_p256(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(message, signature)
        .map_err(|_| CryptoError::InvalidSignature.into())
}

/// Splits the DER element at the start of `data` into its tag, its contents and the
/// bytes following it.
fn der_element(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = data.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let (len_bytes, rest) = rest.split_at(count);
        let len = len_bytes
            .iter()
            .fold(0usize, |len, b| len << 8 | usize::from(*b));
        (len, rest)
    };
    if rest.len() < len {
        return None;
    }
    let (contents, rest) = rest.split_at(len);
    Some((tag, contents, rest))
}

fn certificate_len(data: &[u8]) -> Option<usize> {
    match der_element(data)? {
        (DER_SEQUENCE, _, rest) => Some(data.len() - rest.len()),
        _ => None,
    }
}

/// The subject public key bits of an X.509 certificate.
fn certificate_public_key(certificate: &[u8]) -> Option<&[u8]> {
    let certificate = match der_element(certificate)? {
        (DER_SEQUENCE, contents, _) => contents,
        _ => return None,
    };
    let mut fields = match der_element(certificate)? {
        (DER_SEQUENCE, tbs, _) => tbs,
        _ => return None,
    };
    if let (DER_EXPLICIT_VERSION, _, rest) = der_element(fields)? {
        fields = rest;
    }
    // serialNumber, signature, issuer, validity, subject
    for _ in 0..5 {
        let (_, _, rest) = der_element(fields)?;
        fields = rest;
    }
    let spki = match der_element(fields)? {
        (DER_SEQUENCE, spki, _) => spki,
        _ => return None,
    };
    let (_, _, rest) = der_element(spki)?;
    let key = match der_element(rest)? {
        (DER_BIT_STRING, key, _) => key,
        _ => return None,
    };
    match key.split_first()? {
        (&0, key) => Some(key),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ring::{
        rand::SystemRandom,
        signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING},
    };

    pub(crate) fn der(tag: u8, contents: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        match contents.len() {
            len if len < 0x80 => out.push(len as u8),
            len if len <= 0xff => out.extend_from_slice(&[0x81, len as u8]),
            len => {
                out.push(0x82);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
        }
        out.extend_from_slice(contents);
        out
    }

    /// A structurally valid certificate carrying `point` as its subject key.
    pub(crate) fn certificate(point: &[u8]) -> Vec<u8> {
        let empty = der(DER_SEQUENCE, &[]);
        let mut key_bits = vec![0x00];
        key_bits.extend_from_slice(point);
        let spki = [empty.clone(), der(DER_BIT_STRING, &key_bits)].concat();
        let tbs = [
            der(DER_EXPLICIT_VERSION, &der(0x02, &[0x02])),
            der(0x02, &[0x01]),
            empty.clone(),
            empty.clone(),
            empty.clone(),
            empty.clone(),
            der(DER_SEQUENCE, &spki),
        ]
        .concat();
        let body = [der(DER_SEQUENCE, &tbs), empty, der(DER_BIT_STRING, &[0x00])].concat();
        der(DER_SEQUENCE, &body)
    }

    pub(crate) fn key_pair() -> EcdsaKeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref()).unwrap()
    }

    /// Registration response signed by a fresh attestation key.
    pub(crate) fn registration(
        credential: &EcdsaKeyPair,
        app_param: &[u8; 32],
        client_param: &[u8; 32],
    ) -> Vec<u8> {
        let attestation = key_pair();
        let mut registration = RegistrationData {
            public_key: credential.public_key().as_ref().to_vec(),
            key_handle: vec![0x4b; 64],
            certificate: certificate(attestation.public_key().as_ref()),
            signature: Vec::new(),
        };
        let signed = registration.signed_data(app_param, client_param);
        registration.signature = attestation
            .sign(&SystemRandom::new(), &signed)
            .unwrap()
            .as_ref()
            .to_vec();

        let mut data = vec![RESERVED_BYTE];
        data.extend_from_slice(&registration.public_key);
        data.push(registration.key_handle.len() as u8);
        data.extend_from_slice(&registration.key_handle);
        data.extend_from_slice(&registration.certificate);
        data.extend_from_slice(&registration.signature);
        data
    }

    #[test]
    fn test_parse_and_verify_registration() {
        let credential = key_pair();
        let data = registration(&credential, &[0xaa; 32], &[0xcc; 32]);
        let registration = RegistrationData::parse(&data).unwrap();
        assert_eq!(registration.public_key, credential.public_key().as_ref());
        assert_eq!(registration.key_handle, vec![0x4b; 64]);
        assert_eq!(
            certificate_len(&registration.certificate),
            Some(registration.certificate.len())
        );
        assert!(!registration.signature.is_empty());
        registration.verify(&[0xaa; 32], &[0xcc; 32]).unwrap();
        assert!(matches!(
            registration.verify(&[0xab; 32], &[0xcc; 32]),
            Err(Error::Crypto(CryptoError::InvalidSignature))
        ));
    }

    #[test]
    fn test_registration_rejects_bad_layout() {
        let credential = key_pair();
        let mut data = registration(&credential, &[0; 32], &[0; 32]);
        assert!(RegistrationData::parse(&data[..60]).is_err());
        data[0] = 0x04;
        assert!(matches!(
            RegistrationData::parse(&data),
            Err(Error::BadResponse(_))
        ));
    }

    #[test]
    fn test_registration_as_attestation() {
        let credential = key_pair();
        let data = registration(&credential, &[0xaa; 32], &[0xcc; 32]);
        let registration = RegistrationData::parse(&data).unwrap();
        let attestation = registration.to_attestation(&[0xaa; 32]).unwrap();
        assert_eq!(attestation.fmt, "fido-u2f");

        let auth_data = attestation.authenticator_data().unwrap();
        assert_eq!(auth_data.rp_id_hash, [0xaa; 32]);
        assert!(auth_data.flags.user_present());
        assert!(auth_data.flags.attested_data_included());
        assert_eq!(auth_data.counter, 0);
        assert_eq!(&auth_data.rest[..16], &[0u8; 16]);
        assert_eq!(&auth_data.rest[16..18], &[0x00, 0x40]);
        assert_eq!(&auth_data.rest[18..82], &[0x4b; 64][..]);
        let key: Value = ciborium::de::from_reader(&auth_data.rest[82..]).unwrap();
        let point = cose::point_from_key_agreement(&key).unwrap();
        assert_eq!(point, credential.public_key().as_ref());

        let statement = attestation.att_stmt.as_map().unwrap();
        assert_eq!(statement[0].1, Value::Bytes(registration.signature.clone()));
        assert_eq!(
            statement[1].1,
            Value::Array(vec![Value::Bytes(registration.certificate.clone())])
        );
    }

    #[test]
    fn test_parse_and_verify_signature() {
        let credential = key_pair();
        let mut signature = SignatureData {
            user_presence: 0x01,
            counter: 7,
            signature: Vec::new(),
        };
        let signed = signature.signed_data(&[0x11; 32], &[0x22; 32]);
        signature.signature = credential
            .sign(&SystemRandom::new(), &signed)
            .unwrap()
            .as_ref()
            .to_vec();

        let mut data = vec![0x01, 0x00, 0x00, 0x00, 0x07];
        data.extend_from_slice(&signature.signature);
        let parsed = SignatureData::parse(&data).unwrap();
        assert_eq!(parsed, signature);
        assert!(parsed.is_user_present());
        let public_key = credential.public_key().as_ref();
        parsed.verify(&[0x11; 32], &[0x22; 32], public_key).unwrap();
        assert!(parsed.verify(&[0x11; 32], &[0x23; 32], public_key).is_err());
        assert!(matches!(
            parsed.verify(&[0x11; 32], &[0x22; 32], &public_key[1..]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(SignatureData::parse(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_der_long_lengths() {
        let element = der(0x04, &[0x55; 300]);
        assert_eq!(&element[..4], &[0x04, 0x82, 0x01, 0x2c]);
        let (tag, contents, rest) = der_element(&element).unwrap();
        assert_eq!((tag, contents.len(), rest.len()), (0x04, 300, 0));
        assert!(der_element(&element[..100]).is_none());
        assert!(certificate_len(&element).is_none());
    }
}
