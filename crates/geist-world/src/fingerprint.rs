use std::fmt;

use sha2::{Digest, Sha256};

/// Content hash of one chunk's decoded payload. Used for change detection only.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkFingerprint(pub [u8; 32]);

impl ChunkFingerprint {
    pub const LEN: usize = 32;

    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkFingerprint({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
