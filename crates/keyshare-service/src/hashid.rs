use anyhow::Result;
use harsh::Harsh;

use crate::error::{ServiceError, ServiceResult};

/// Reversible obfuscated external ids for keys and categories.
///
/// Internal row ids are sequential; exposing them would allow enumeration.
/// The hashid encoding is deterministic, collision-free, and reversible, so
/// no extra id column lookup is needed on the way back in.
#[derive(Clone)]
pub struct HashidCodec {
    harsh: Harsh,
}

impl HashidCodec {
    pub fn new(salt: &str) -> Result<Self> {
        let harsh = Harsh::builder()
            .salt(salt)
            .length(8)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid hashid configuration: {}", e))?;
        Ok(Self { harsh })
    }

    pub fn encode(&self, id: i64) -> String {
        self.harsh.encode(&[id as u64])
    }

    /// Decodes an external id back to the internal row id. A failed decode
    /// signals a malformed or forged identifier.
    pub fn decode(&self, hashid: &str) -> ServiceResult<i64> {
        let values = self.harsh.decode(hashid).map_err(|_| ServiceError::InvalidId)?;
        match values.as_slice() {
            [value] => Ok(*value as i64),
            _ => Err(ServiceError::InvalidId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let codec = HashidCodec::new("test-salt").unwrap();
        let encoded = codec.encode(42);
        assert_ne!(encoded, "42");
        assert_eq!(codec.decode(&encoded).unwrap(), 42);
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = HashidCodec::new("test-salt").unwrap();
        assert!(matches!(
            codec.decode("!!not-a-hashid!!"),
            Err(ServiceError::InvalidId)
        ));
    }

    #[test]
    fn different_salts_produce_different_ids() {
        let a = HashidCodec::new("salt-a").unwrap();
        let b = HashidCodec::new("salt-b").unwrap();
        assert_ne!(a.encode(7), b.encode(7));
    }
}
