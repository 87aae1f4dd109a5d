//! JSON payload codec.
//!
//! Handler parameters and reply values travel as self-describing JSON
//! text. Reply bodies always pass through [`encode`], including unit
//! replies, which serialize to the literal `null`. Missing fields on
//! decode default according to the target type's serde attributes.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Serializes `value` to a JSON body.
///
/// # Errors
/// `CodecError::Encode` if the value cannot be represented as JSON.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

/// Deserializes a JSON body into `T`.
///
/// # Errors
/// `CodecError::Decode` if the body is not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, CodecError> {
    serde_json::from_slice(body).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Order {
        id: u64,
        #[serde(default)]
        region: String,
    }

    #[test]
    fn round_trips_a_struct() {
        let body = encode(&Order {
            id: 7,
            region: "eu".to_string(),
        })
        .unwrap();
        let order: Order = decode(&body).unwrap();
        assert_eq!(order.id, 7);
        assert_eq!(order.region, "eu");
    }

    #[test]
    fn unit_encodes_to_literal_null() {
        let body = encode(&()).unwrap();
        assert_eq!(&body[..], b"null");
    }

    #[test]
    fn missing_fields_take_their_default() {
        let order: Order = decode(&Bytes::from_static(b"{\"id\":7}")).unwrap();
        assert_eq!(order.region, "");
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = decode::<Order>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
