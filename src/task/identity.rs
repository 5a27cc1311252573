// src/task/identity.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, hashable key of a unit of work: a task kind plus a canonical
/// argument blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub kind: String,
    pub args: String,
}

impl Identity {
    pub fn new(kind: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: args.into(),
        }
    }

    /// Build an identity whose argument blob is the JSON form of `args`.
    ///
    /// Struct fields serialize in declaration order, so the same value
    /// always yields the same blob.
    pub fn from_args<T: Serialize>(kind: impl Into<String>, args: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind, serde_json::to_string(args)?))
    }

    /// Content hash of the identity, usable as a file name.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.args.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.args)
    }
}
