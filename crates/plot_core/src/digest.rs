//! Work function: proof bytes -> K-byte key.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

pub const SHA256_OUT: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    /// BLAKE3 in XOF mode, so any key width is available.
    #[default]
    Blake3,
    /// SHA-256 truncated to the key width (at most 32 bytes).
    Sha256,
}

impl DigestKind {
    pub fn max_output(self) -> Option<usize> {
        match self {
            DigestKind::Blake3 => None,
            DigestKind::Sha256 => Some(SHA256_OUT),
        }
    }

    /// Fill `out` with the digest of `proof`. `out.len()` is the key width.
    #[inline]
    pub fn digest_into(self, proof: &[u8], out: &mut [u8]) {
        match self {
            DigestKind::Blake3 => {
                let mut h = blake3::Hasher::new();
                h.update(proof);
                h.finalize_xof().fill(out);
            }
            DigestKind::Sha256 => {
                let d = Sha256::digest(proof);
                out.copy_from_slice(&d[..out.len()]);
            }
        }
    }

    pub fn digest(self, proof: &[u8], key_len: usize) -> Vec<u8> {
        let mut out = vec![0u8; key_len];
        self.digest_into(proof, &mut out);
        out
    }

    /// True when `key` is what this work function yields for `proof`.
    pub fn verify(self, key: &[u8], proof: &[u8]) -> bool {
        let mut buf = [0u8; 64];
        if key.len() <= buf.len() {
            let out = &mut buf[..key.len()];
            self.digest_into(proof, out);
            out == key
        } else {
            self.digest(proof, key.len()) == key
        }
    }
}

impl std::str::FromStr for DigestKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(DigestKind::Blake3),
            "sha256" => Ok(DigestKind::Sha256),
            other => Err(format!("unknown digest {other:?}")),
        }
    }
}
