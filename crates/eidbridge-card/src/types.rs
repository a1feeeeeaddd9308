//! Common types shared across card implementations.
//!
//! This module defines the values that travel between card backends, the
//! command handlers and the UI: certificate classification, reader and PIN
//! metadata, and signature algorithm descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Intended use of a certificate (and its private key) on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    /// Client authentication key (digitalSignature).
    Authentication,

    /// Qualified signature key (nonRepudiation).
    Signing,
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Signing => write!(f, "signing"),
        }
    }
}

/// Card reader information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Reader name as reported by the smart card service.
    pub name: String,

    /// Whether the reader has a PIN-pad for secure PIN entry.
    pub has_pin_pad: bool,
}

impl ReaderInfo {
    /// Create a new ReaderInfo for a reader without PIN-pad.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_pin_pad: false,
        }
    }

    /// Mark the reader as having a PIN-pad.
    pub fn with_pin_pad(mut self) -> Self {
        self.has_pin_pad = true;
        self
    }
}

/// Certificate slots available on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCapabilities {
    pub authentication: bool,
    pub signing: bool,
}

impl CardCapabilities {
    /// Capabilities of a card holding both certificates.
    pub fn all() -> Self {
        Self {
            authentication: true,
            signing: true,
        }
    }

    /// Check whether the card holds a certificate of the given type.
    pub fn supports(&self, certificate_type: CertificateType) -> bool {
        match certificate_type {
            CertificateType::Authentication => self.authentication,
            CertificateType::Signing => self.signing,
        }
    }
}

/// PIN metadata shown next to the PIN prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinInfo {
    pub min_length: u8,
    pub max_length: u8,
    pub retries_left: u8,
    pub max_retries: u8,
    pub reader_has_pin_pad: bool,
}

impl PinInfo {
    /// Check whether the PIN is blocked.
    pub fn is_blocked(&self) -> bool {
        self.retries_left == 0
    }
}

/// PIN entered in the UI.
///
/// The buffer is wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(***)")
    }
}

/// Hash functions accepted for document signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-224")]
    Sha224,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
    #[serde(rename = "SHA3-224")]
    Sha3_224,
    #[serde(rename = "SHA3-256")]
    Sha3_256,
    #[serde(rename = "SHA3-384")]
    Sha3_384,
    #[serde(rename = "SHA3-512")]
    Sha3_512,
}

impl HashAlgorithm {
    /// All supported hash functions.
    pub const ALL: [HashAlgorithm; 8] = [
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
        Self::Sha3_224,
        Self::Sha3_256,
        Self::Sha3_384,
        Self::Sha3_512,
    ];

    /// Name used in command arguments and results.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
            Self::Sha3_224 => "SHA3-224",
            Self::Sha3_256 => "SHA3-256",
            Self::Sha3_384 => "SHA3-384",
            Self::Sha3_512 => "SHA3-512",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha224 | Self::Sha3_224 => 28,
            Self::Sha256 | Self::Sha3_256 => 32,
            Self::Sha384 | Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 => 64,
        }
    }

    /// Look up a hash function by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algorithm| algorithm.name() == name)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// JWS algorithm of the card's authentication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JsonWebSignatureAlgorithm {
    ES256,
    ES384,
    ES512,
    PS256,
    PS384,
    PS512,
    RS256,
    RS384,
    RS512,
}

impl JsonWebSignatureAlgorithm {
    /// Hash function used to build the value signed for authentication.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::ES256 | Self::PS256 | Self::RS256 => HashAlgorithm::Sha256,
            Self::ES384 | Self::PS384 | Self::RS384 => HashAlgorithm::Sha384,
            Self::ES512 | Self::PS512 | Self::RS512 => HashAlgorithm::Sha512,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        }
    }
}

impl fmt::Display for JsonWebSignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature algorithm descriptor reported to the browser extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAlgorithm {
    /// `ECC` or `RSA`.
    pub crypto_algorithm: String,

    /// Hash function name, e.g. `SHA-256`.
    pub hash_function: String,

    /// `NONE`, `PKCS1.5` or `PSS`.
    pub padding_scheme: String,
}

impl SignatureAlgorithm {
    /// ECDSA signature with the given hash function.
    pub fn ecc(hash: HashAlgorithm) -> Self {
        Self {
            crypto_algorithm: "ECC".to_string(),
            hash_function: hash.name().to_string(),
            padding_scheme: "NONE".to_string(),
        }
    }

    /// RSA PKCS#1 v1.5 signature with the given hash function.
    pub fn rsa_pkcs1(hash: HashAlgorithm) -> Self {
        Self {
            crypto_algorithm: "RSA".to_string(),
            hash_function: hash.name().to_string(),
            padding_scheme: "PKCS1.5".to_string(),
        }
    }
}
