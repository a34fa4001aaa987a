/// Punctuation allowed in key segments on top of ASCII letters and digits.
const SAFE_PUNCTUATION: &str = "()_-~.=";

/// Every character a key segment may contain.
pub const SAFE_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789()_-~.=";

/// Returns true if `c` may appear in a key segment.
pub fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(c)
}

/// Returns true if `s` is non-empty and consists of safe characters only.
pub fn is_safe_str(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_safe_char)
}

/// Replaces every character outside [`SAFE_CHARS`] with `replacement`.
pub fn replace_unsafe_chars(s: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if is_safe_char(c) {
            out.push(c);
        } else {
            out.push_str(replacement);
        }
    }
    out
}
