use ciborium::value::{Integer, Value};

use super::ordered_ser::to_canonical_vec;
use crate::{
    ctap::command::CtapCommand,
    error::{Error, Result},
};

/// Packs positional command parameters into a map keyed from 1, leaving out the
/// absent ones instead of encoding them as null.
pub fn pack_args<I>(args: I) -> Value
where
    I: IntoIterator<Item = Option<Value>>,
{
    Value::Map(
        args.into_iter()
            .enumerate()
            .filter_map(|(i, arg)| arg.map(|arg| (Value::from(i as u64 + 1), arg)))
            .collect(),
    )
}

/// Encodes a request as the command byte followed by the canonical CBOR arguments.
pub fn encode_request(command: CtapCommand, args: Option<Value>) -> Result<Vec<u8>> {
    let mut request = vec![u8::from(command)];
    if let Some(args) = args {
        request.extend(to_canonical_vec(args)?);
    }
    Ok(request)
}

pub(crate) fn value_to_u64(value: &Value) -> Option<u64> {
    value.as_integer().and_then(|i| u64::try_from(i).ok())
}

pub(crate) fn value_to_i64(value: &Value) -> Option<i64> {
    value.as_integer().and_then(|i| i64::try_from(i).ok())
}

/// Helper for building argument values out of byte slices.
pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    Value::Bytes(bytes.to_vec())
}

/// A decoded CTAP2 response: a CBOR map with unsigned integer keys.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMap {
    entries: Vec<(u64, Value)>,
}

impl ResponseMap {
    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Map(map) => map,
            other => {
                return Err(Error::bad_response(format!(
                    "Expected a CBOR map, got {:?}",
                    other
                )))
            }
        };
        let entries = map
            .into_iter()
            .map(|(k, v)| match value_to_u64(&k) {
                Some(k) => Ok((k, v)),
                None => Err(Error::bad_response(format!("Unexpected map key {:?}", k))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ResponseMap { entries })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(data)
            .map_err(|e| Error::bad_response(format!("Invalid CBOR: {}", e)))?;
        ResponseMap::from_value(value)
    }

    pub fn get(&self, key: u64) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::Integer(Integer::from(k)), v))
                .collect(),
        )
    }

    fn typed<'a, T>(
        &'a self,
        key: u64,
        kind: &str,
        convert: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => convert(value).map(Some).ok_or_else(|| {
                Error::bad_response(format!("Field 0x{:02x} should be {}, got {:?}", key, kind, value))
            }),
        }
    }

    fn required<T>(key: u64, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| Error::bad_response(format!("Missing field 0x{:02x}", key)))
    }

    pub fn bytes(&self, key: u64) -> Result<Option<&[u8]>> {
        self.typed(key, "a byte string", |v| v.as_bytes().map(Vec::as_slice))
    }

    pub fn require_bytes(&self, key: u64) -> Result<&[u8]> {
        Self::required(key, self.bytes(key)?)
    }

    pub fn uint(&self, key: u64) -> Result<Option<u64>> {
        self.typed(key, "an unsigned integer", value_to_u64)
    }

    pub fn require_uint(&self, key: u64) -> Result<u64> {
        Self::required(key, self.uint(key)?)
    }

    pub fn int(&self, key: u64) -> Result<Option<i64>> {
        self.typed(key, "an integer", value_to_i64)
    }

    pub fn bool(&self, key: u64) -> Result<Option<bool>> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    pub fn text(&self, key: u64) -> Result<Option<&str>> {
        self.typed(key, "a text string", |v| v.as_text())
    }

    pub fn map(&self, key: u64) -> Result<Option<&[(Value, Value)]>> {
        self.typed(key, "a map", |v| v.as_map().map(Vec::as_slice))
    }

    pub fn require_map(&self, key: u64) -> Result<&[(Value, Value)]> {
        Self::required(key, self.map(key)?)
    }

    pub fn array(&self, key: u64) -> Result<Option<&[Value]>> {
        self.typed(key, "an array", |v| v.as_array().map(Vec::as_slice))
    }

    /// An array of text strings, empty when the field is absent.
    pub fn text_list(&self, key: u64) -> Result<Vec<String>> {
        self.array(key)?
            .unwrap_or_default()
            .iter()
            .map(|v| {
                v.as_text().map(str::to_owned).ok_or_else(|| {
                    Error::bad_response(format!("Field 0x{:02x} should only hold text", key))
                })
            })
            .collect()
    }

    /// A nested map with integer keys, such as a COSE key or a user entity.
    pub fn nested(&self, key: u64) -> Result<Option<ResponseMap>> {
        match self.get(key) {
            None => Ok(None),
            Some(value @ Value::Map(_)) => Ok(Some(ResponseMap::from_value(value.clone())?)),
            Some(other) => Err(Error::bad_response(format!(
                "Field 0x{:02x} should be a map, got {:?}",
                key, other
            ))),
        }
    }
}
