//! Wire records for blocks and links.
//!
//! The canonical byte form of a block is its protobuf encoding: tagged
//! fields in fixed order, defaults omitted. The content id of a block is
//! the digest of exactly these bytes, so encoding must stay deterministic.

use prost::Message;
use tracing::debug;

use super::cid::ContentId;
use super::error::StorageError;

/// Reference from an index block to a child block.
///
/// `name` is empty on anonymous leaf links. `tsize` records the payload
/// byte count reachable beneath the link (for a leaf link, the chunk
/// length).
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Link {
    /// Textual content id of the child block.
    #[prost(string, tag = "1")]
    pub hash: String,

    /// Optional display name.
    #[prost(string, tag = "2")]
    pub name: String,

    /// Cumulative payload size beneath this link.
    #[prost(uint64, tag = "3")]
    pub tsize: u64,
}

impl Link {
    /// Anonymous link to a leaf chunk.
    pub fn to_leaf(id: &ContentId, size: u64) -> Self {
        Self {
            hash: id.to_string(),
            name: String::new(),
            tsize: size,
        }
    }

    /// Parse the linked child's content id.
    pub fn child_id(&self) -> Result<ContentId, StorageError> {
        ContentId::parse(&self.hash)
    }
}

/// The core block record.
///
/// A well-formed block is either a leaf (`data` set, `links` empty) or an
/// index (`links` set, `data` empty); `name` is set only on the root of a
/// named payload and only together with links.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Block {
    /// Payload name; set only on the root block.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Opaque chunk bytes; present iff the block is a leaf.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,

    /// Ordered child links; non-empty iff the block is an index.
    #[prost(message, repeated, tag = "3")]
    pub links: Vec<Link>,
}

impl Block {
    /// Leaf block holding one chunk of payload bytes.
    pub fn leaf(data: Vec<u8>) -> Self {
        Self {
            name: String::new(),
            data,
            links: Vec::new(),
        }
    }

    /// Root/index block naming a payload and listing its chunks in read
    /// order.
    pub fn index(name: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
            links,
        }
    }

    /// Whether this block carries chunk bytes.
    pub fn is_leaf(&self) -> bool {
        !self.data.is_empty() && self.links.is_empty()
    }

    /// Whether this block links to children.
    pub fn is_index(&self) -> bool {
        self.data.is_empty() && !self.links.is_empty()
    }

    /// Well-formedness: exactly one of `data`/`links` non-empty, and a
    /// name only on index blocks.
    pub fn is_well_formed(&self) -> bool {
        if self.name.is_empty() {
            self.is_leaf() || self.is_index()
        } else {
            self.is_index()
        }
    }

    /// Total payload size reachable through this block's links.
    pub fn total_size(&self) -> u64 {
        self.links.iter().map(|l| l.tsize).sum()
    }

    /// Canonical bytes of this record.
    ///
    /// A record that is neither leaf nor index has no canonical form.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        if !self.is_well_formed() {
            return Err(StorageError::EncodeFailed(
                "block must be either a leaf or an index".to_string(),
            ));
        }
        Ok(self.encode_to_vec())
    }

    /// Exact inverse of [`Block::encode`] on well-formed inputs.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let block =
            <Self as Message>::decode(bytes).map_err(|e| StorageError::DecodeFailed(e.to_string()))?;

        if !block.is_well_formed() {
            debug!(
                data_len = block.data.len(),
                link_count = block.links.len(),
                "Decoded block is not well-formed"
            );
            return Err(StorageError::DecodeFailed(
                "block must be either a leaf or an index".to_string(),
            ));
        }

        Ok(block)
    }

    /// Digest of the canonical bytes.
    pub fn content_id(&self) -> Result<ContentId, StorageError> {
        Ok(ContentId::digest(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let block = Block::leaf(b"chunk bytes".to_vec());

        let bytes = block.encode().unwrap();
        let restored = Block::decode_bytes(&bytes).unwrap();

        assert_eq!(block, restored);
        assert!(restored.is_leaf());
        assert!(!restored.is_index());
    }

    #[test]
    fn test_index_roundtrip_preserves_link_order() {
        let links: Vec<Link> = (0..10)
            .map(|i| Link::to_leaf(&ContentId::digest(&[i as u8]), i as u64 + 1))
            .collect();
        let block = Block::index("payload", links.clone());

        let bytes = block.encode().unwrap();
        let restored = Block::decode_bytes(&bytes).unwrap();

        assert_eq!(restored.name, "payload");
        assert_eq!(restored.links, links);
    }

    #[test]
    fn test_encoding_deterministic() {
        let make = || {
            Block::index(
                "doc",
                vec![Link::to_leaf(&ContentId::digest(b"a"), 3)],
            )
        };

        assert_eq!(make().encode().unwrap(), make().encode().unwrap());
    }

    #[test]
    fn test_content_id_matches_digest_of_encoding() {
        let block = Block::leaf(b"addressed".to_vec());

        let id = block.content_id().unwrap();
        assert!(id.verify(&block.encode().unwrap()));
    }

    #[test]
    fn test_empty_block_has_no_canonical_form() {
        let block = Block::default();
        assert!(matches!(block.encode(), Err(StorageError::EncodeFailed(_))));
    }

    #[test]
    fn test_named_leaf_is_ill_formed() {
        let block = Block {
            name: "oops".to_string(),
            data: b"chunk".to_vec(),
            links: Vec::new(),
        };
        assert!(!block.is_well_formed());
        assert!(block.encode().is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        // High tag numbers with truncated payloads are not valid protobuf.
        let result = Block::decode_bytes(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(StorageError::DecodeFailed(_))));
    }

    #[test]
    fn test_decode_empty_record_fails() {
        // Zero bytes decode to the default record, which is neither leaf
        // nor index.
        let result = Block::decode_bytes(&[]);
        assert!(matches!(result, Err(StorageError::DecodeFailed(_))));
    }

    #[test]
    fn test_link_child_id_roundtrip() {
        let id = ContentId::digest(b"child");
        let link = Link::to_leaf(&id, 42);

        assert_eq!(link.child_id().unwrap(), id);
        assert!(link.name.is_empty());
        assert_eq!(link.tsize, 42);
    }

    #[test]
    fn test_link_invalid_hash() {
        let link = Link {
            hash: "garbage".to_string(),
            name: String::new(),
            tsize: 0,
        };
        assert!(matches!(
            link.child_id(),
            Err(StorageError::IdentifierInvalid(_))
        ));
    }

    #[test]
    fn test_total_size_sums_links() {
        let block = Block::index(
            "sum",
            vec![
                Link::to_leaf(&ContentId::digest(b"a"), 512),
                Link::to_leaf(&ContentId::digest(b"b"), 512),
                Link::to_leaf(&ContentId::digest(b"c"), 100),
            ],
        );
        assert_eq!(block.total_size(), 1124);
    }
}
