//! Identity normalization for cross-source matching.
//!
//! OCS and Active Directory spell the same computer differently (`PC01`,
//! `pc01 `, `Pc01`). Records are matched on an [`IdentityKey`]: the SHA-256
//! digest of the trimmed, lower-cased name. The key is only ever used for
//! matching. Index documents stay keyed by the raw name.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-addressed identity of a computer name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Hex form of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a raw name to its identity key.
///
/// An empty (or all-whitespace) name still hashes deterministically; callers
/// drop such records before reconciliation.
pub fn normalize(name: &str) -> IdentityKey {
    let mut hasher = Sha256::new();
    hasher.update(name.trim().to_lowercase().as_bytes());
    IdentityKey(format!("{:x}", hasher.finalize()))
}
