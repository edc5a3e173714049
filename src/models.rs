//! Core data models shared by every harvesting job.
//!
//! An image is identified by an [`ImageCode`]: one lowercase ASCII letter
//! followed by a decimal id (`s89120`). Jobs exchange codes only through file
//! names, branch names, and flat log files, so parsing lives here and every
//! component goes through it.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z])(\d+)$").expect("valid code regex"));

static FILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z])(\d+)\.jpg$").expect("valid file name regex"));

static TRAILING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z](\d+)\.jpg$").expect("valid trailing number regex"));

/// Errors from parsing image codes and file names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("invalid prefix '{0}': expected a single lowercase letter a-z")]
    Prefix(String),

    #[error("invalid image code '{0}': expected a lowercase letter followed by digits")]
    Code(String),

    #[error("invalid image file name '{0}': expected <letter><digits>.jpg")]
    FileName(String),

    #[error("image id in '{0}' does not fit in 64 bits")]
    Overflow(String),
}

/// A prefix letter plus numeric id.
///
/// Leading zeros are not preserved: `s000123` parses to `s123`. Components
/// that must keep the literal spelling (file names, stored codes) carry the
/// original string next to the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageCode {
    pub prefix: char,
    pub number: u64,
}

impl ImageCode {
    pub fn new(prefix: char, number: u64) -> Result<Self, CodeError> {
        if !prefix.is_ascii_lowercase() {
            return Err(CodeError::Prefix(prefix.to_string()));
        }
        Ok(Self { prefix, number })
    }

    /// Parse a `<letter><digits>.jpg` file name, ignoring ASCII case.
    pub fn from_file_name(name: &str) -> Result<Self, CodeError> {
        let lower = name.to_ascii_lowercase();
        let caps = FILE_NAME_RE
            .captures(&lower)
            .ok_or_else(|| CodeError::FileName(name.to_string()))?;
        build(&caps, name)
    }
}

impl FromStr for ImageCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CODE_RE
            .captures(s)
            .ok_or_else(|| CodeError::Code(s.to_string()))?;
        build(&caps, s)
    }
}

impl fmt::Display for ImageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)
    }
}

fn build(caps: &regex::Captures<'_>, original: &str) -> Result<ImageCode, CodeError> {
    // Both capture groups are mandatory in every regex routed here.
    let prefix = caps[1].chars().next().unwrap_or('?');
    let number = caps[2]
        .parse::<u64>()
        .map_err(|_| CodeError::Overflow(original.to_string()))?;
    ImageCode::new(prefix, number)
}

/// Validate a CLI prefix argument.
pub fn parse_prefix(s: &str) -> Result<char, CodeError> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() => Ok(c),
        _ => Err(CodeError::Prefix(s.to_string())),
    }
}

/// The id in a path or URL ending `<letter><digits>.jpg`, case-insensitive.
///
/// Unlike [`ImageCode::from_file_name`] this is unanchored on the left, so
/// `photo_s12.jpg` yields `12`.
pub fn trailing_image_number(path: &str) -> Option<u64> {
    let lower = path.to_ascii_lowercase();
    TRAILING_NUMBER_RE
        .captures(&lower)
        .and_then(|caps| caps[1].parse().ok())
}

/// A contiguous id range a branch is expected to hold.
///
/// `start > end` is tolerated and describes an empty range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeRecord {
    pub start: u64,
    pub end: u64,
    pub branch: String,
}

impl RangeRecord {
    pub fn contains(&self, number: u64) -> bool {
        self.start <= number && number <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn overlaps(&self, other: &RangeRecord) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start <= other.end
            && other.start <= self.end
    }
}

/// Metadata extracted from one image URL, ready for upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub code: String,
    pub prefix: String,
    pub number: i64,
    pub folder: String,
    pub url: String,
}

/// A persisted image row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ImageRecord {
    pub code: String,
    pub prefix: String,
    pub number: i64,
    pub folder: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code() {
        let code: ImageCode = "s89120".parse().unwrap();
        assert_eq!(code.prefix, 's');
        assert_eq!(code.number, 89120);
        assert_eq!(code.to_string(), "s89120");
    }

    #[test]
    fn rejects_bad_codes() {
        for bad in ["", "s", "89120", "S89120", "ss1", "s12a", "s-1"] {
            assert!(bad.parse::<ImageCode>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn huge_id_is_overflow() {
        let err = "a99999999999999999999999".parse::<ImageCode>().unwrap_err();
        assert!(matches!(err, CodeError::Overflow(_)));
    }

    #[test]
    fn file_name_ignores_case_and_keeps_value() {
        let code = ImageCode::from_file_name("S000123.JPG").unwrap();
        assert_eq!(code, ImageCode::new('s', 123).unwrap());
        assert!(ImageCode::from_file_name("s123.png").is_err());
        assert!(ImageCode::from_file_name("x_s123.jpg").is_err());
    }

    #[test]
    fn constructor_rejects_uppercase_prefix() {
        assert!(ImageCode::new('S', 1).is_err());
        assert_eq!("s7".parse::<ImageCode>().unwrap(), ImageCode::new('s', 7).unwrap());
    }

    #[test]
    fn prefix_argument() {
        assert_eq!(parse_prefix("k").unwrap(), 'k');
        assert!(parse_prefix("K").is_err());
        assert!(parse_prefix("ab").is_err());
        assert!(parse_prefix("").is_err());
    }

    #[test]
    fn trailing_number_is_unanchored() {
        assert_eq!(trailing_image_number("dir/photo_s12.jpg"), Some(12));
        assert_eq!(trailing_image_number("https://x/y/A10.JPG"), Some(10));
        assert_eq!(trailing_image_number("readme.md"), None);
    }

    #[test]
    fn empty_range_contains_nothing() {
        let r = RangeRecord {
            start: 200,
            end: 100,
            branch: "b_200_to_100".into(),
        };
        assert!(r.is_empty());
        assert!(!r.contains(150));
        assert!(!r.contains(200));
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = RangeRecord {
            start: 1,
            end: 100,
            branch: "a".into(),
        };
        let b = RangeRecord {
            start: 100,
            end: 200,
            branch: "b".into(),
        };
        let c = RangeRecord {
            start: 101,
            end: 200,
            branch: "c".into(),
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
