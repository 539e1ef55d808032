use cid::Cid;
use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::error::StorageError;

/// SHA2-256 multihash code
const SHA2_256_CODE: u64 = 0x12;

/// Raw codec identifier (0x55) for opaque block bytes
const RAW_CODEC: u64 = 0x55;

/// Compute SHA2-256 multihash from data
fn sha256_multihash(data: &[u8]) -> Multihash<64> {
    let digest = Sha256::digest(data);
    Multihash::wrap(SHA2_256_CODE, &digest).expect("SHA256 digest is always 32 bytes")
}

/// Content identifier wrapping CIDv1 with SHA2-256 multihash.
///
/// Every block is addressed by the digest of its canonical bytes; two
/// identical byte sequences always produce the same `ContentId`. The
/// textual form is the base32 multibase rendering of the binary id.
#[derive(Clone)]
pub struct ContentId {
    inner: Cid,
}

impl ContentId {
    /// Digest raw bytes into a ContentId (SHA2-256, RAW codec).
    pub fn digest(data: &[u8]) -> Self {
        let hash = sha256_multihash(data);
        let cid = Cid::new_v1(RAW_CODEC, hash);
        Self { inner: cid }
    }

    /// Wrap an existing CID.
    pub fn from_cid(cid: Cid) -> Self {
        Self { inner: cid }
    }

    /// Parse a ContentId from its textual (multibase) form.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        let cid = Cid::from_str(s).map_err(|e| StorageError::IdentifierInvalid(e.to_string()))?;
        Ok(Self { inner: cid })
    }

    /// Parse from the canonical binary encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let cid =
            Cid::try_from(bytes).map_err(|e| StorageError::IdentifierInvalid(e.to_string()))?;
        Ok(Self { inner: cid })
    }

    /// The canonical binary encoding; this is what flows on the peer stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes()
    }

    /// The underlying CID.
    pub fn as_cid(&self) -> &Cid {
        &self.inner
    }

    /// The digest bytes without version/codec prefix.
    pub fn hash_bytes(&self) -> &[u8] {
        self.inner.hash().digest()
    }

    /// Verify that `data` digests to this id.
    pub fn verify(&self, data: &[u8]) -> bool {
        self == &Self::digest(data)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentId").field(&self.to_string()).finish()
    }
}

impl FromStr for ContentId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for ContentId {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for ContentId {}

impl Hash for ContentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash().digest().hash(state);
    }
}

impl Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct ContentIdVisitor;

        impl<'de> Visitor<'de> for ContentIdVisitor {
            type Value = ContentId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a CID string or bytes")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                ContentId::parse(v).map_err(de::Error::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                ContentId::from_bytes(v).map_err(de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ContentIdVisitor)
        } else {
            deserializer.deserialize_bytes(ContentIdVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let data = b"hello world";
        let id1 = ContentId::digest(data);
        let id2 = ContentId::digest(data);

        assert_eq!(id1, id2, "Same data should produce identical ids");
    }

    #[test]
    fn test_different_data_different_id() {
        let id1 = ContentId::digest(b"hello");
        let id2 = ContentId::digest(b"world");

        assert_ne!(id1, id2, "Different data should produce different ids");
    }

    #[test]
    fn test_string_roundtrip() {
        let original = ContentId::digest(b"test data");
        let text = original.to_string();
        let parsed = ContentId::parse(&text).unwrap();

        assert_eq!(original, parsed);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = ContentId::digest(b"test data");
        let bytes = original.to_bytes();
        let restored = ContentId::from_bytes(&bytes).unwrap();

        assert_eq!(original, restored);
    }

    #[test]
    fn test_known_vector() {
        // RAW + SHA2-256 CIDv1 must stay compatible with other
        // content-addressed implementations.
        let id = ContentId::digest(b"hello world");
        let expected = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";
        assert_eq!(id.to_string(), expected);
    }

    #[test]
    fn test_verify() {
        let data = b"verify me";
        let id = ContentId::digest(data);

        assert!(id.verify(data));
        assert!(!id.verify(b"modified"));
    }

    #[test]
    fn test_hash_bytes_length() {
        let id = ContentId::digest(b"test");
        assert_eq!(id.hash_bytes().len(), 32, "SHA256 produces 32 bytes");
    }

    #[test]
    fn test_parse_invalid() {
        let result = ContentId::parse("not-a-valid-cid");
        assert!(matches!(result, Err(StorageError::IdentifierInvalid(_))));
    }

    #[test]
    fn test_from_bytes_invalid() {
        let result = ContentId::from_bytes(&[0, 1, 2, 3]);
        assert!(matches!(result, Err(StorageError::IdentifierInvalid(_))));
    }

    #[test]
    fn test_hash_set_membership() {
        use std::collections::HashSet;

        let id1 = ContentId::digest(b"hash test");
        let id2 = ContentId::digest(b"hash test");

        let mut set = HashSet::new();
        set.insert(id1);

        assert!(set.contains(&id2));
    }

    #[test]
    fn test_json_serialization() {
        let id = ContentId::digest(b"json test");
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: ContentId = serde_json::from_str(&json).unwrap();

        assert_eq!(id, deserialized);
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_empty_data() {
        let id = ContentId::digest(b"");
        assert!(!id.to_string().is_empty());
        assert!(id.verify(b""));
    }
}
