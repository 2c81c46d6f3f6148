//! Content digests and incremental verification

use std::fmt;
use std::str::FromStr;

use sha2::Digest as _;
use sha2::{Sha256, Sha512};

/// Hash algorithms a digest may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// SHA-256, the canonical algorithm.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl Algorithm {
    /// The algorithm blobs are addressed by unless a client asks otherwise.
    pub const CANONICAL: Algorithm = Algorithm::Sha256;

    /// Name used in the `<algorithm>:<hex>` form.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sha256") {
            Ok(Algorithm::Sha256)
        } else if s.eq_ignore_ascii_case("sha512") {
            Ok(Algorithm::Sha512)
        } else {
            Err(DigestError::UnsupportedAlgorithm(s.to_owned()))
        }
    }
}

/// Why a string is not a usable digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    /// No `:` between algorithm and hex.
    #[error("expected <algorithm>:<hex>")]
    MissingSeparator,

    /// Unknown or unsupported algorithm.
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// Hex part has the wrong length for its algorithm.
    #[error("{algorithm} digest must have {expected} hex characters, got {actual}")]
    InvalidLength {
        /// Algorithm named by the digest.
        algorithm: Algorithm,
        /// Required length.
        expected: usize,
        /// Length found.
        actual: usize,
    },

    /// Hex part contains a non-hex character.
    #[error("digest contains non-hex characters")]
    InvalidHex,
}

/// An algorithm-qualified content digest, `<algorithm>:<hex>`.
///
/// The hex part is stored lowercase, so equality is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Digest of `data` under `algorithm`.
    pub fn of(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut verifier = DigestVerifier::new(algorithm);
        verifier.update(data);
        verifier.digest()
    }

    /// Canonical digest of zero bytes.
    pub fn empty() -> Self {
        Digest::of(Algorithm::CANONICAL, &[])
    }

    /// The algorithm part.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex part.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s.split_once(':').ok_or(DigestError::MissingSeparator)?;
        let algorithm: Algorithm = algorithm.parse()?;

        if hex.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength {
                algorithm,
                expected: algorithm.hex_len(),
                actual: hex.len(),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex);
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

#[derive(Clone)]
enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Incremental hash over the bytes of an upload.
///
/// Bytes are fed once, in order; [`digest`](DigestVerifier::digest) seals a
/// copy of the state, so the verifier stays usable afterwards.
#[derive(Clone)]
pub struct DigestVerifier {
    hasher: Hasher,
    len: u64,
}

impl fmt::Debug for DigestVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestVerifier")
            .field("algorithm", &self.algorithm())
            .field("len", &self.len)
            .finish()
    }
}

impl Default for DigestVerifier {
    fn default() -> Self {
        DigestVerifier::new(Algorithm::CANONICAL)
    }
}

impl DigestVerifier {
    /// A verifier with no bytes fed.
    pub fn new(algorithm: Algorithm) -> Self {
        let hasher = match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        };
        Self { hasher, len: 0 }
    }

    /// Algorithm this verifier computes.
    pub fn algorithm(&self) -> Algorithm {
        match self.hasher {
            Hasher::Sha256(_) => Algorithm::Sha256,
            Hasher::Sha512(_) => Algorithm::Sha512,
        }
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bytes have been fed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Feed the next bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
        self.len += data.len() as u64;
    }

    /// Digest of everything fed so far.
    pub fn digest(&self) -> Digest {
        let hex = match &self.hasher {
            Hasher::Sha256(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha512(h) => hex::encode(h.clone().finalize()),
        };
        Digest {
            algorithm: self.algorithm(),
            hex,
        }
    }

    /// Whether everything fed so far hashes to `expected`.
    pub fn verify(&self, expected: &Digest) -> bool {
        expected.algorithm() == self.algorithm() && self.digest() == *expected
    }
}
