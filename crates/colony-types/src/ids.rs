//! Type-safe 256-bit identifier wrappers.
//!
//! Run keys, tumor cell identifiers, collectible identifiers and visited-cell
//! keys are all 32-byte words. Each gets its own newtype so they cannot be
//! mixed up at compile time. On the wire every word renders as a
//! `0x`-prefixed, 64-digit lowercase hex string.

use sha2::{Digest, Sha256};
use ts_rs::TS;

/// Number of bytes in a ledger word.
pub const WORD_LEN: usize = 32;

/// Errors produced when parsing an identifier from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input was not valid hexadecimal.
    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    /// The decoded input did not have exactly 32 bytes.
    #[error("identifier must be {WORD_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Decode a `0x`-prefixed (or bare) hex string into a 32-byte word.
fn decode_word(input: &str) -> Result<[u8; WORD_LEN], IdError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| IdError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    <[u8; WORD_LEN]>::try_from(bytes).map_err(|_bytes| IdError::InvalidLength(len))
}

/// Generates a newtype wrapper around a 32-byte word with hex (de)serialization.
macro_rules! define_word {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(#[ts(as = "String")] [u8; WORD_LEN]);

        impl $name {
            /// The all-zero word.
            pub const ZERO: Self = Self([0; WORD_LEN]);

            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; WORD_LEN]) -> Self {
                Self(bytes)
            }

            /// Return the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; WORD_LEN] {
                &self.0
            }

            /// Return the `0x`-prefixed hex form.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl core::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_word(s).map(Self)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = IdError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                <[u8; WORD_LEN]>::try_from(bytes)
                    .map(Self)
                    .map_err(|_err| IdError::InvalidLength(bytes.len()))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_word! {
    /// Opaque identifier grouping every event of one simulation execution.
    RunKey
}

define_word! {
    /// Identifier of a tumor cell, unique within its run.
    CellId
}

define_word! {
    /// Identifier of a collectible food item on the foraging grid.
    CollectibleId
}

define_word! {
    /// Deterministic dedup key for a visited grid cell.
    CellKey
}

define_word! {
    /// Digest of content held outside the ledger, such as a run's result
    /// archive or the tumor geometry it was run against.
    ContentHash
}

/// SHA-256 of arbitrary bytes as a ledger word.
fn sha256_word(data: &[u8]) -> [u8; WORD_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

impl RunKey {
    /// Derive a run key from a human-readable label (e.g. `"run-A"`).
    pub fn from_label(label: &str) -> Self {
        Self(sha256_word(label.as_bytes()))
    }

    /// Derive a run key from a simulation configuration.
    ///
    /// The configuration is rendered by [`canonical_json`], which matches
    /// the simulation producer's sorted-key JSON text, so the ledger and
    /// the producer derive the same key for the same run.
    ///
    /// [`canonical_json`]: crate::canonical::canonical_json
    pub fn from_config(config: &serde_json::Value) -> Self {
        let canonical = crate::canonical::canonical_json(config);
        Self(sha256_word(canonical.as_bytes()))
    }

    /// Pick a shard in `0..shards` for this key.
    ///
    /// Run keys are already uniformly distributed hashes, so the leading
    /// eight bytes are used directly. Returns 0 when `shards` is 0.
    pub fn shard_index(&self, shards: usize) -> usize {
        leading_u64(&self.0)
            .checked_rem(u64::try_from(shards).unwrap_or(u64::MAX))
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0)
    }

    /// Leading eight bytes as a signed integer, used as an advisory lock id.
    pub fn lock_id(&self) -> i64 {
        i64::from_be_bytes(leading_u64(&self.0).to_be_bytes())
    }
}

impl CellKey {
    /// Compute the dedup key for grid coordinates `(x, y)`.
    ///
    /// The coordinates are packed big-endian (`x` then `y`, four bytes each)
    /// and hashed with SHA-256.
    pub fn for_coordinates(x: u32, y: u32) -> Self {
        let mut packed = [0_u8; 8];
        let (hi, lo) = packed.split_at_mut(4);
        hi.copy_from_slice(&x.to_be_bytes());
        lo.copy_from_slice(&y.to_be_bytes());
        Self(sha256_word(&packed))
    }

    /// Pick a shard in `0..shards` for this key.
    pub fn shard_index(&self, shards: usize) -> usize {
        leading_u64(&self.0)
            .checked_rem(u64::try_from(shards).unwrap_or(u64::MAX))
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0)
    }
}

/// Build a word holding `value` as a big-endian 256-bit unsigned integer.
fn word_from_u128(value: u128) -> [u8; WORD_LEN] {
    let mut word = [0_u8; WORD_LEN];
    let (_, low) = word.split_at_mut(16);
    low.copy_from_slice(&value.to_be_bytes());
    word
}

impl CellId {
    /// Cell identifier from an integer.
    pub fn from_u128(value: u128) -> Self {
        Self(word_from_u128(value))
    }
}

impl CollectibleId {
    /// Collectible identifier from an integer.
    pub fn from_u128(value: u128) -> Self {
        Self(word_from_u128(value))
    }
}

impl ContentHash {
    /// SHA-256 of `content`.
    pub fn digest(content: &[u8]) -> Self {
        Self(sha256_word(content))
    }
}

fn leading_u64(word: &[u8; WORD_LEN]) -> u64 {
    word.first_chunk::<8>()
        .map_or(0, |chunk| u64::from_be_bytes(*chunk))
}

/// Identity of the caller submitting an operation.
///
/// The ledger treats identities as opaque strings (agent names, wallet
/// addresses, service accounts). Surrounding whitespace is stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    /// Build a caller identity. Returns `None` for blank input.
    pub fn new(identity: &str) -> Option<Self> {
        let trimmed = identity.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CallerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
