//! Core constants shared by the bridge crates.
//!
//! Command names and argument keys follow the messages the browser extension
//! sends, so they must stay byte-for-byte stable.
//!
//! # Usage
//!
//! ```
//! use eidbridge_core::constants::*;
//!
//! assert_eq!(CMD_AUTHENTICATE, "authenticate");
//! assert!(ALLOWED_ORIGIN_SCHEMES.contains(&"https"));
//! ```

// ============================================================================
// Command names
// ============================================================================

/// Read the signing certificate of the selected card.
pub const CMD_GET_SIGNING_CERTIFICATE: &str = "get-signing-certificate";

/// Create an authentication token for the requesting origin.
pub const CMD_AUTHENTICATE: &str = "authenticate";

/// Sign a document hash with the signing key.
pub const CMD_SIGN: &str = "sign";

// ============================================================================
// Argument keys
// ============================================================================

/// Origin of the page that requested the operation.
pub const ARG_ORIGIN: &str = "origin";

/// Server-issued challenge nonce (authenticate).
pub const ARG_CHALLENGE_NONCE: &str = "challengeNonce";

/// Base64 encoded document hash (sign).
pub const ARG_HASH: &str = "hash";

/// Hash function name, e.g. `SHA-256` (sign).
pub const ARG_HASH_FUNCTION: &str = "hashFunction";

/// Base64 encoded DER signing certificate (sign).
pub const ARG_CERTIFICATE: &str = "certificate";

// ============================================================================
// Argument limits
// ============================================================================

/// Maximum origin length in characters.
pub const MAX_ORIGIN_LENGTH: usize = 255;

/// Minimum challenge nonce length (256 bits of entropy, base64 encoded).
pub const MIN_CHALLENGE_NONCE_LENGTH: usize = 44;

/// Maximum challenge nonce length.
pub const MAX_CHALLENGE_NONCE_LENGTH: usize = 128;

/// Origin schemes accepted from the browser extension.
pub const ALLOWED_ORIGIN_SCHEMES: [&str; 2] = ["https", "wss"];

// ============================================================================
// Result keys
// ============================================================================

/// Authentication token format identifier.
pub const AUTH_TOKEN_FORMAT: &str = "web-eid:1.0";

// ============================================================================
// Controller defaults
// ============================================================================

/// Default number of user-initiated retries before the run is aborted.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of state transitions kept for diagnostics.
pub const DEFAULT_HISTORY_LIMIT: usize = 64;
