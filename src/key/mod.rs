//! Keys: tuples of URL/filename-safe strings and their signed physical form.
pub mod safe_chars;
pub mod signing;
pub mod tuple;

pub use safe_chars::{is_safe_str, replace_unsafe_chars, SAFE_CHARS};
pub use signing::{sign, unsign, MAX_DIGEST_LEN};
pub use tuple::{KeyPart, SafeStrTuple};
