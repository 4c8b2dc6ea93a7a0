use std::cmp::Ordering;

use ciborium::value::Value;

use crate::error::Error;

fn encoded_key(value: &Value) -> Result<Vec<u8>, Error> {
    match value {
        Value::Integer(_) | Value::Text(_) | Value::Bytes(_) => {
            let mut buf = Vec::new();
            ciborium::ser::into_writer(value, &mut buf)
                .map_err(|e| Error::Encoding(format!("Couldn't encode map key: {}", e)))?;
            Ok(buf)
        }
        other => Err(Error::Encoding(format!(
            "Encountered a map key that isn't an integer, text or byte string: {:?}",
            other
        ))),
    }
}

/// Canonical CTAP2 key order: shorter encodings first, then bytewise. This puts
/// unsigned integers before negative ones and integers before text.
fn cmp_encoded(k1: &[u8], k2: &[u8]) -> Ordering {
    k1.len().cmp(&k2.len()).then_with(|| k1.cmp(k2))
}

/// Given a CBOR value, modifies it such that any map within it is ordered according to
/// the CTAP2 canonical CBOR encoding scheme.
pub fn make_ordered(value: &mut Value) -> Result<(), Error> {
    match value {
        Value::Tag(_t, v) => make_ordered(v)?,
        Value::Array(vals) => {
            for v in vals {
                make_ordered(v)?;
            }
        }
        Value::Map(m) => {
            let mut keyed = Vec::with_capacity(m.len());
            for (mut k, mut v) in m.drain(..) {
                make_ordered(&mut v)?;
                let encoded = encoded_key(&k)?;
                make_ordered(&mut k)?;
                keyed.push((encoded, k, v));
            }
            keyed.sort_by(|(e1, _, _), (e2, _, _)| cmp_encoded(e1, e2));
            m.extend(keyed.into_iter().map(|(_, k, v)| (k, v)));
        }
        _ => {}
    }
    Ok(())
}

/// Serializes a value with its maps in canonical order.
pub fn to_canonical_vec(mut value: Value) -> Result<Vec<u8>, Error> {
    make_ordered(&mut value)?;
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&value, &mut buf)
        .map_err(|e| Error::Encoding(format!("Couldn't serialize CBOR: {}", e)))?;
    Ok(buf)
}
