//! Fixed-width value types carried on the wire.
//!
//! None of these types perform cryptography: hashes, keys and signatures are
//! opaque byte arrays produced and checked by the external handle.  The only
//! hashing done by this crate is [`Hash::digest`], used to derive dedup keys.

use std::{fmt, str::FromStr};

/// Byte width of a [`Hash`] / [`Key`].
pub const HASH_SIZE: usize = 32;

/// Byte width of a [`Signature`].
pub const SIGNATURE_SIZE: usize = 64;

/// A 32-byte hash: snapshot hashes, transaction hashes, round hashes and node
/// identities all use this type.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_SIZE]);

/// Network identity of a node.
pub type PeerId = Hash;

impl Hash {
    /// Blake3 digest of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Blake3 digest over several parts, without concatenating them first.
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// A 32-byte curve point or scalar: CoSi commitments (`R`) and responses.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Key(pub [u8; HASH_SIZE]);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex::encode(self.0))
    }
}

/// A 64-byte signature produced by the handle.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_SIZE])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// An aggregated CoSi signature together with its participant bitmask.
///
/// Bit `i` of `mask` is set when the `i`-th node of the signing set
/// contributed a commitment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CosiSignature {
    pub signature: Signature,
    pub mask: u64,
}

/// Opaque pool counters attached to a round frontier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolInfo {
    pub count: u64,
    pub index: u64,
}

/// One node's claimed frontier of its personal round chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPoint {
    /// Node whose round chain this point describes.
    pub node_id: PeerId,
    /// Latest round number known for that node.
    pub round: u64,
    /// Hash of that round.
    pub hash: Hash,
    pub pool: PoolInfo,
}

/// Result of a successful authentication, produced by the handle.
///
/// `data` is the raw authentication message; it is kept so a relayer can
/// vouch for its consumers in a `Consumers` broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthToken {
    pub peer_id: PeerId,
    pub timestamp: u64,
    pub is_relayer: bool,
    pub data: Vec<u8>,
}

/// A finalized snapshot read from storage, with its position in the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotWithOrder {
    pub hash: Hash,
    /// Node that authored the snapshot.
    pub node_id: PeerId,
    /// Round of `node_id` the snapshot belongs to.
    pub round: u64,
    /// Global topological order.
    pub topology: u64,
    /// Versioned snapshot encoding, opaque to this crate.
    pub data: Vec<u8>,
}
