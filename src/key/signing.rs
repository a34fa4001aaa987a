//! Signature suffixes for key segments.
//!
//! Every segment of a key gets `"_" + base32(md5(segment))[..digest_len]`
//! appended before it reaches physical storage. The digest is computed over
//! the case-sensitive segment, so `aaAA` and `AAaa` map to different file
//! names even on a filesystem that folds case.

use data_encoding::BASE32_NOPAD;
use md5::{Digest, Md5};

use super::tuple::SafeStrTuple;

/// Length of an unpadded base32 MD5 digest; longer requests are clamped to it.
pub const MAX_DIGEST_LEN: usize = 26;

/// Builds the signature suffix for `input`, or an empty string when
/// `digest_len` is zero.
pub fn signature_suffix(input: &str, digest_len: usize) -> String {
    let digest_len = digest_len.min(MAX_DIGEST_LEN);
    if digest_len == 0 {
        return String::new();
    }
    let encoded = BASE32_NOPAD.encode(&Md5::digest(input.as_bytes()));
    format!("_{}", encoded[..digest_len].to_lowercase())
}

/// Returns the unsigned prefix of `input` if it ends with its own signature.
fn signed_prefix(input: &str, digest_len: usize) -> Option<&str> {
    let digest_len = digest_len.min(MAX_DIGEST_LEN);
    if digest_len == 0 || input.len() <= digest_len + 1 {
        return None;
    }
    let prefix = &input[..input.len() - digest_len - 1];
    (input[prefix.len()..] == signature_suffix(prefix, digest_len)).then_some(prefix)
}

/// Appends a signature to `input` unless it already carries one.
pub fn sign_str(input: &str, digest_len: usize) -> String {
    if digest_len == 0 || signed_prefix(input, digest_len).is_some() {
        return input.to_string();
    }
    format!("{}{}", input, signature_suffix(input, digest_len))
}

/// Strips the signature from `input` if one is present.
pub fn unsign_str(input: &str, digest_len: usize) -> String {
    signed_prefix(input, digest_len)
        .unwrap_or(input)
        .to_string()
}

/// Signs every segment of `key`. Idempotent; the identity for `digest_len == 0`.
pub fn sign(key: &SafeStrTuple, digest_len: usize) -> SafeStrTuple {
    if digest_len == 0 {
        return key.clone();
    }
    key.map_segments(|s| sign_str(s, digest_len))
}

/// Strips signatures from every segment of `key`.
pub fn unsign(key: &SafeStrTuple, digest_len: usize) -> SafeStrTuple {
    if digest_len == 0 {
        return key.clone();
    }
    key.map_segments(|s| unsign_str(s, digest_len))
}
