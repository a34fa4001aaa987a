use std::fmt;
use std::ops::{Add, Index};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::safe_chars::{is_safe_char, is_safe_str};
use crate::{Error, Result};

/// Raw key input before normalization.
///
/// Any tree of strings and tuples can be expressed with it; [`SafeStrTuple::new`]
/// flattens the tree depth-first, left to right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPart {
    Str(String),
    Tuple(SafeStrTuple),
    Seq(Vec<KeyPart>),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}

impl From<SafeStrTuple> for KeyPart {
    fn from(t: SafeStrTuple) -> Self {
        KeyPart::Tuple(t)
    }
}

impl From<&SafeStrTuple> for KeyPart {
    fn from(t: &SafeStrTuple) -> Self {
        KeyPart::Tuple(t.clone())
    }
}

impl<T: Into<KeyPart>> From<Vec<T>> for KeyPart {
    fn from(items: Vec<T>) -> Self {
        KeyPart::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<KeyPart>, const N: usize> From<[T; N]> for KeyPart {
    fn from(items: [T; N]) -> Self {
        KeyPart::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<KeyPart>> From<&[T]> for KeyPart {
    fn from(items: &[T]) -> Self {
        KeyPart::Seq(items.iter().cloned().map(Into::into).collect())
    }
}

impl<A: Into<KeyPart>, B: Into<KeyPart>> From<(A, B)> for KeyPart {
    fn from((a, b): (A, B)) -> Self {
        KeyPart::Seq(vec![a.into(), b.into()])
    }
}

impl<A: Into<KeyPart>, B: Into<KeyPart>, C: Into<KeyPart>> From<(A, B, C)> for KeyPart {
    fn from((a, b, c): (A, B, C)) -> Self {
        KeyPart::Seq(vec![a.into(), b.into(), c.into()])
    }
}

/// An immutable, flat, non-empty sequence of non-empty safe strings.
///
/// This is the canonical key of every store. Equality, ordering and hashing
/// are structural over the flattened chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SafeStrTuple {
    chain: Vec<String>,
}

impl SafeStrTuple {
    /// Normalizes `input` into a tuple.
    ///
    /// Fails with [`Error::InvalidKey`] if a leaf string is empty or carries a
    /// character outside the safe set, or if the input flattens to nothing.
    pub fn new(input: impl Into<KeyPart>) -> Result<Self> {
        let mut chain = Vec::new();
        flatten_into(input.into(), &mut chain)?;
        if chain.is_empty() {
            return Err(Error::InvalidKey(
                "a key must contain at least one string".to_string(),
            ));
        }
        Ok(Self { chain })
    }

    /// Wraps segments that are already known to be safe and non-empty.
    pub(crate) fn from_trusted(chain: Vec<String>) -> Self {
        debug_assert!(!chain.is_empty() && chain.iter().all(|s| is_safe_str(s)));
        Self { chain }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.chain
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.chain.iter()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.chain.get(index).map(String::as_str)
    }

    pub fn first(&self) -> &str {
        &self.chain[0]
    }

    pub fn last(&self) -> &str {
        &self.chain[self.chain.len() - 1]
    }

    /// Splits the tuple into its leading directory segments and final name.
    pub fn split_last(&self) -> (&[String], &str) {
        let n = self.chain.len() - 1;
        (&self.chain[..n], &self.chain[n])
    }

    pub fn contains(&self, segment: &str) -> bool {
        self.chain.iter().any(|s| s == segment)
    }

    pub fn count(&self, segment: &str) -> usize {
        self.chain.iter().filter(|s| *s == segment).count()
    }

    /// Returns `self` followed by `other`.
    pub fn concat(&self, other: &SafeStrTuple) -> SafeStrTuple {
        let mut chain = self.chain.clone();
        chain.extend(other.chain.iter().cloned());
        Self { chain }
    }

    pub fn reversed(&self) -> SafeStrTuple {
        Self {
            chain: self.chain.iter().rev().cloned().collect(),
        }
    }

    pub(crate) fn map_segments(&self, f: impl Fn(&str) -> String) -> SafeStrTuple {
        Self::from_trusted(self.chain.iter().map(|s| f(s)).collect())
    }

    pub fn into_vec(self) -> Vec<String> {
        self.chain
    }
}

fn flatten_into(part: KeyPart, out: &mut Vec<String>) -> Result<()> {
    match part {
        KeyPart::Str(s) => {
            if s.is_empty() {
                return Err(Error::InvalidKey(
                    "only non-empty strings are allowed in a key".to_string(),
                ));
            }
            if let Some(bad) = s.chars().find(|c| !is_safe_char(*c)) {
                return Err(Error::InvalidKey(format!(
                    "invalid character {:?} in key segment {:?}",
                    bad, s
                )));
            }
            out.push(s);
        }
        KeyPart::Tuple(t) => out.extend(t.chain),
        KeyPart::Seq(items) => {
            for item in items {
                flatten_into(item, out)?;
            }
        }
    }
    Ok(())
}

impl Index<usize> for SafeStrTuple {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.chain[index]
    }
}

impl<'a> IntoIterator for &'a SafeStrTuple {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.chain.iter()
    }
}

impl Add for SafeStrTuple {
    type Output = SafeStrTuple;

    fn add(mut self, other: SafeStrTuple) -> SafeStrTuple {
        self.chain.extend(other.chain);
        self
    }
}

impl Add<&SafeStrTuple> for &SafeStrTuple {
    type Output = SafeStrTuple;

    fn add(self, other: &SafeStrTuple) -> SafeStrTuple {
        self.concat(other)
    }
}

impl fmt::Display for SafeStrTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chain.join("/"))
    }
}

/// Parses `a/b/c` into a three-segment tuple.
impl FromStr for SafeStrTuple {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SafeStrTuple::new(s.split('/').collect::<Vec<_>>())
    }
}

impl TryFrom<&str> for SafeStrTuple {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        SafeStrTuple::new(s)
    }
}

impl TryFrom<Vec<String>> for SafeStrTuple {
    type Error = Error;

    fn try_from(chain: Vec<String>) -> Result<Self> {
        SafeStrTuple::new(chain)
    }
}

impl From<SafeStrTuple> for Vec<String> {
    fn from(t: SafeStrTuple) -> Self {
        t.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(parts: &[&str]) -> SafeStrTuple {
        SafeStrTuple::new(parts).unwrap()
    }

    #[test]
    fn test_flattening() {
        let nested = KeyPart::Seq(vec![
            vec!["a", "b", "c"].into(),
            t(&["d", "e", "f", "g", "h"]).into(),
            KeyPart::Seq(vec![
                "i".into(),
                "j".into(),
                KeyPart::Seq(vec!["k".into(), "l".into(), ("m", ("n", "o")).into()]),
            ]),
        ]);
        let s = SafeStrTuple::new(nested).unwrap();
        assert_eq!(s.as_slice().concat(), "abcdefghijklmno");
        assert_eq!(s.len(), 15);
    }

    #[test]
    fn test_empty_nested_sequences_are_skipped() {
        let s = SafeStrTuple::new(KeyPart::Seq(vec![
            KeyPart::Seq(vec![]),
            "a".into(),
            KeyPart::Seq(vec![]),
        ]))
        .unwrap();
        assert_eq!(s, t(&["a"]));
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(SafeStrTuple::new(""), Err(Error::InvalidKey(_))));
        assert!(matches!(
            SafeStrTuple::new(Vec::<String>::new()),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            SafeStrTuple::new(vec!["ok", ""]),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            SafeStrTuple::new("qwerty\tuiop"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(SafeStrTuple::new("a/b"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_concat_and_reverse() {
        let s1 = t(&["a", "b", "c"]);
        let s2 = t(&["d", "e", "f"]);
        assert_eq!(&s1 + &s2, t(&["a", "b", "c", "d", "e", "f"]));
        assert_eq!(s2.clone() + s1.clone(), t(&["d", "e", "f", "a", "b", "c"]));
        assert_eq!(s1.reversed().reversed(), s1);
        assert_ne!(s1.reversed(), s1);
    }

    #[test]
    fn test_sequence_accessors() {
        let s = t(&["a", "b", "c", "a"]);
        assert_eq!(&s[1], "b");
        assert_eq!(s.first(), "a");
        assert_eq!(s.last(), "a");
        assert_eq!(s.count("a"), 2);
        assert_eq!(s.count("zzz"), 0);
        assert!(s.contains("c"));
        assert!(!s.contains("cc"));
        let (dirs, name) = s.split_last();
        assert_eq!(dirs.len(), 3);
        assert_eq!(name, "a");
        assert_eq!(SafeStrTuple::new(&s).unwrap(), s);
    }

    #[test]
    fn test_parse_and_display() {
        let s: SafeStrTuple = "x/y.z/w".parse().unwrap();
        assert_eq!(s, t(&["x", "y.z", "w"]));
        assert_eq!(s.to_string(), "x/y.z/w");
        assert!("x//y".parse::<SafeStrTuple>().is_err());
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let s = t(&["a", "b"]);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let back: SafeStrTuple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert!(serde_json::from_str::<SafeStrTuple>(r#"["a b"]"#).is_err());
        assert!(serde_json::from_str::<SafeStrTuple>("[]").is_err());
    }
}
