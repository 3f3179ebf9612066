//! Minisign signature verification.
//!
//! Release archives are shipped with detached minisign signatures. A public
//! key is a base64 line (optionally preceded by an `untrusted comment:` line)
//! decoding to:
//!
//! ```text
//! "Ed" | key id (8 bytes) | Ed25519 public key (32 bytes)
//! ```
//!
//! A signature file has up to four lines:
//!
//! ```text
//! untrusted comment: <free text>
//! base64("Ed" or "ED" | key id (8) | Ed25519 signature (64))
//! trusted comment: <text covered by the global signature>
//! base64(global signature (64))
//! ```
//!
//! `"ED"` signatures are computed over the BLAKE2b-512 digest of the message
//! (the form used for large release tarballs); `"Ed"` over the raw bytes. The
//! global signature, when present, covers `signature || trusted comment`.
//!
//! Everything here is pure: no I/O, no shared state.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use thiserror::Error;

const UNTRUSTED_PREFIX: &str = "untrusted comment:";
const TRUSTED_PREFIX: &str = "trusted comment: ";

const ALG_LEGACY: [u8; 2] = *b"Ed";
const ALG_PREHASHED: [u8; 2] = *b"ED";

const KEY_ID_LEN: usize = 8;
const PUBLIC_KEY_LEN: usize = 2 + KEY_ID_LEN + 32;
const SIGNATURE_LEN: usize = 2 + KEY_ID_LEN + 64;

/// Errors from parsing or verifying minisign material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MinisignError {
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm([u8; 2]),

    /// The signature was made by a different key than the one trusted.
    #[error("signature key id {signature} does not match public key id {key}")]
    KeyIdMismatch { key: String, signature: String },

    #[error("signature does not match the message")]
    BadSignature,

    #[error("trusted comment signature does not verify")]
    BadTrustedComment,
}

/// A parsed minisign public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_id: [u8; KEY_ID_LEN],
    key: [u8; 32],
}

impl PublicKey {
    /// Parses a public key from its text form.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKey` for bad base64, wrong length, or an unknown
    /// algorithm tag.
    pub fn parse(text: &str) -> Result<Self, MinisignError> {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with(UNTRUSTED_PREFIX))
            .ok_or_else(|| MinisignError::MalformedKey("no key line".into()))?;

        let bytes = STANDARD
            .decode(line)
            .map_err(|e| MinisignError::MalformedKey(e.to_string()))?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(MinisignError::MalformedKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[..2] != ALG_LEGACY {
            return Err(MinisignError::MalformedKey(
                "key algorithm must be Ed".into(),
            ));
        }

        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&bytes[2..2 + KEY_ID_LEN]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[2 + KEY_ID_LEN..]);
        Ok(Self { key_id, key })
    }

    /// Builds a key from raw parts.
    #[must_use]
    pub fn from_parts(key_id: [u8; KEY_ID_LEN], key: [u8; 32]) -> Self {
        Self { key_id, key }
    }

    /// Returns the key id as upper-case hex, the way minisign prints it.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        key_id_hex(&self.key_id)
    }

    /// Renders the key in minisign's base64 line form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(PUBLIC_KEY_LEN);
        bytes.extend_from_slice(&ALG_LEGACY);
        bytes.extend_from_slice(&self.key_id);
        bytes.extend_from_slice(&self.key);
        STANDARD.encode(bytes)
    }
}

/// A parsed minisign signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    algorithm: [u8; 2],
    key_id: [u8; KEY_ID_LEN],
    signature: [u8; 64],
    trusted_comment: Option<String>,
    global_signature: Option<[u8; 64]>,
}

impl Signature {
    /// Parses a signature from its text form.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSignature` for bad base64 or lengths, and
    /// `UnsupportedAlgorithm` for tags other than `Ed`/`ED`.
    pub fn parse(text: &str) -> Result<Self, MinisignError> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .peekable();

        if lines.peek().is_some_and(|l| l.starts_with(UNTRUSTED_PREFIX)) {
            lines.next();
        }

        let sig_line = lines
            .next()
            .ok_or_else(|| MinisignError::MalformedSignature("no signature line".into()))?;
        let bytes = STANDARD
            .decode(sig_line.trim())
            .map_err(|e| MinisignError::MalformedSignature(e.to_string()))?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(MinisignError::MalformedSignature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let algorithm = [bytes[0], bytes[1]];
        if algorithm != ALG_LEGACY && algorithm != ALG_PREHASHED {
            return Err(MinisignError::UnsupportedAlgorithm(algorithm));
        }
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&bytes[2..2 + KEY_ID_LEN]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[2 + KEY_ID_LEN..]);

        let (trusted_comment, global_signature) = match lines.next() {
            Some(line) => {
                let comment = line.strip_prefix(TRUSTED_PREFIX).ok_or_else(|| {
                    MinisignError::MalformedSignature("expected a trusted comment line".into())
                })?;
                let global = match lines.next() {
                    Some(global_line) => Some(decode_64(global_line.trim())?),
                    None => None,
                };
                (Some(comment.to_string()), global)
            }
            None => (None, None),
        };

        Ok(Self {
            algorithm,
            key_id,
            signature,
            trusted_comment,
            global_signature,
        })
    }

    #[must_use]
    pub fn key_id_hex(&self) -> String {
        key_id_hex(&self.key_id)
    }

    #[must_use]
    pub fn is_prehashed(&self) -> bool {
        self.algorithm == ALG_PREHASHED
    }

    #[must_use]
    pub fn trusted_comment(&self) -> Option<&str> {
        self.trusted_comment.as_deref()
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// The trusted comment, present only when its global signature verified.
    pub trusted_comment: Option<String>,
}

impl VerifiedSignature {
    /// Returns the `file:` field of the trusted comment, if any.
    ///
    /// Release signatures record the signed file name as
    /// `timestamp:<n>\tfile:<name>\thashed`.
    #[must_use]
    pub fn signed_file_name(&self) -> Option<&str> {
        self.trusted_comment.as_deref()?.split('\t').find_map(|field| {
            field
                .trim()
                .strip_prefix("file:")
                .map(str::trim)
                .filter(|name| !name.is_empty())
        })
    }
}

/// Verifies `message` against a text public key and text signature.
///
/// Malformed input of any kind is a verification failure, never a panic.
#[must_use]
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> bool {
    let Ok(key) = PublicKey::parse(public_key) else {
        return false;
    };
    let Ok(sig) = Signature::parse(signature) else {
        return false;
    };
    verify_detailed(&key, message, &sig).is_ok()
}

/// Verifies `message` and reports why verification failed.
///
/// The key ids are compared before any cryptographic work; a mismatch means
/// the signature came from a different signer entirely.
///
/// # Errors
///
/// `KeyIdMismatch`, `BadSignature`, or `BadTrustedComment`.
pub fn verify_detailed(
    key: &PublicKey,
    message: &[u8],
    sig: &Signature,
) -> Result<VerifiedSignature, MinisignError> {
    if key.key_id != sig.key_id {
        return Err(MinisignError::KeyIdMismatch {
            key: key.key_id_hex(),
            signature: sig.key_id_hex(),
        });
    }

    let verifying_key = VerifyingKey::from_bytes(&key.key)
        .map_err(|e| MinisignError::MalformedKey(e.to_string()))?;

    let primary = Ed25519Signature::from_bytes(&sig.signature);
    let checked = if sig.is_prehashed() {
        let digest = Blake2b512::digest(message);
        verifying_key.verify(&digest, &primary)
    } else {
        verifying_key.verify(message, &primary)
    };
    checked.map_err(|_| MinisignError::BadSignature)?;

    let trusted_comment = match (&sig.trusted_comment, &sig.global_signature) {
        (Some(comment), Some(global)) => {
            let mut covered = Vec::with_capacity(64 + comment.len());
            covered.extend_from_slice(&sig.signature);
            covered.extend_from_slice(comment.as_bytes());
            verifying_key
                .verify(&covered, &Ed25519Signature::from_bytes(global))
                .map_err(|_| MinisignError::BadTrustedComment)?;
            Some(comment.clone())
        }
        // No global signature: the comment is not covered, so it is not trusted.
        _ => None,
    };

    Ok(VerifiedSignature { trusted_comment })
}

fn decode_64(line: &str) -> Result<[u8; 64], MinisignError> {
    let bytes = STANDARD
        .decode(line)
        .map_err(|e| MinisignError::MalformedSignature(e.to_string()))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        MinisignError::MalformedSignature(format!(
            "global signature must be 64 bytes, got {}",
            b.len()
        ))
    })
}

fn key_id_hex(id: &[u8; KEY_ID_LEN]) -> String {
    // minisign stores the id little-endian and prints it as a u64
    let mut reversed = *id;
    reversed.reverse();
    hex::encode_upper(reversed)
}
