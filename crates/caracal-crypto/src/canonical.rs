use serde::Serialize;

use crate::error::CryptoError;

/// Deterministic byte form of a serializable value.
///
/// Round-trips through `serde_json::Value` so that map keys come out
/// sorted (`Value::Object` is backed by a `BTreeMap`) and no insignificant
/// whitespace is emitted. Signatures and event hashes are computed over
/// exactly these bytes; two values with the same fields always canonicalize
/// to the same byte string regardless of field declaration order.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CryptoError> {
    let value =
        serde_json::to_value(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| CryptoError::Serialization(e.to_string()))
}
