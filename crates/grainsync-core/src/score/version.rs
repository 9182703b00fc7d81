//! Grain version strings.
//!
//! A version is one or more comma-separated components, each an optional
//! upper-case tag followed by a `major.minor` number, e.g. `1.00` or
//! `1.04,VENDOR2.10`. Versions are only partially ordered: two versions whose
//! tags move in opposite directions are [`VersionOrdering::Inconsistent`].

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Result of comparing two version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOrdering {
    /// This version is lower than the other.
    Lower,
    /// Both versions are equal.
    Equal,
    /// This version is greater than the other.
    Greater,
    /// The versions cannot be compared.
    Inconsistent,
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrdering::Lower => write!(f, "lower"),
            VersionOrdering::Equal => write!(f, "equal"),
            VersionOrdering::Greater => write!(f, "greater"),
            VersionOrdering::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// A parsed grain version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionString {
    raw: String,
    components: BTreeMap<String, f64>,
}

impl VersionString {
    /// The version given to grains that declare none.
    pub const DEFAULT: &'static str = "1.00";

    /// Parse a version string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::InvalidVersion("empty grain version string".to_string()));
        }

        let mut components = BTreeMap::new();
        for component in raw.split(',') {
            let (tag, number) = split_component(component).ok_or_else(|| {
                Error::InvalidVersion(format!(
                    "version component '{}' does not match TAG<major>.<minor>",
                    component
                ))
            })?;
            let value: f64 = number.parse().map_err(|_| {
                Error::InvalidVersion(format!("version component '{}' is not numeric", component))
            })?;
            components.insert(tag.to_string(), value);
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    /// Compare this version with another.
    ///
    /// Every tag present in either version is compared. A tag missing on one
    /// side counts as lower on that side.
    pub fn compare(&self, other: &VersionString) -> VersionOrdering {
        let tags: BTreeSet<&String> = self
            .components
            .keys()
            .chain(other.components.keys())
            .collect();

        let mut result = VersionOrdering::Equal;
        for tag in tags {
            let step = match (self.components.get(tag), other.components.get(tag)) {
                (Some(a), Some(b)) if a > b => VersionOrdering::Greater,
                (Some(a), Some(b)) if a < b => VersionOrdering::Lower,
                (Some(_), Some(_)) => VersionOrdering::Equal,
                (Some(_), None) => VersionOrdering::Greater,
                (None, _) => VersionOrdering::Lower,
            };

            result = match (result, step) {
                (current, VersionOrdering::Equal) => current,
                (VersionOrdering::Equal, step) => step,
                (current, step) if current == step => current,
                _ => return VersionOrdering::Inconsistent,
            };
        }
        result
    }

    /// The original text of the version.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Split `TAG1.23` into (`TAG`, `1.23`). The tag is `[A-Z_]*`, the number
/// must be `digits.digits`.
fn split_component(component: &str) -> Option<(&str, &str)> {
    let split = component
        .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
        .unwrap_or(component.len());
    let (tag, number) = component.split_at(split);

    let (major, minor) = number.split_once('.')?;
    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if is_digits(major) && is_digits(minor) {
        Some((tag, number))
    } else {
        None
    }
}

impl Default for VersionString {
    fn default() -> Self {
        let mut components = BTreeMap::new();
        components.insert(String::new(), 1.0);
        Self {
            raw: Self::DEFAULT.to_string(),
            components,
        }
    }
}

impl PartialEq for VersionString {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == VersionOrdering::Equal
    }
}

impl FromStr for VersionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionString {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionString> for String {
    fn from(value: VersionString) -> Self {
        value.raw
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionString {
        VersionString::parse(s).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let version = v("1.00");
        assert_eq!(version.as_str(), "1.00");
        assert_eq!(version.to_string(), "1.00");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VersionString::parse("").is_err());
        assert!(VersionString::parse("1").is_err());
        assert!(VersionString::parse("abc1.0").is_err());
        assert!(VersionString::parse("1.0,").is_err());
        assert!(VersionString::parse("TAG1.x").is_err());
    }

    #[test]
    fn test_compare_single_component() {
        assert_eq!(v("1.01").compare(&v("1.00")), VersionOrdering::Greater);
        assert_eq!(v("1.00").compare(&v("1.01")), VersionOrdering::Lower);
        assert_eq!(v("1.00").compare(&v("1.0")), VersionOrdering::Equal);
        assert_eq!(v("2.5").compare(&v("2.50")), VersionOrdering::Equal);
    }

    #[test]
    fn test_compare_tagged_components() {
        assert_eq!(
            v("1.00,ACME2.0").compare(&v("1.00,ACME1.0")),
            VersionOrdering::Greater
        );
        // Order of components does not matter.
        assert_eq!(
            v("ACME1.0,1.00").compare(&v("1.00,ACME1.0")),
            VersionOrdering::Equal
        );
        // A tag only present on one side makes that side greater.
        assert_eq!(v("1.00,ACME1.0").compare(&v("1.00")), VersionOrdering::Greater);
        assert_eq!(v("1.00").compare(&v("1.00,ACME1.0")), VersionOrdering::Lower);
    }

    #[test]
    fn test_compare_inconsistent() {
        assert_eq!(
            v("1.01,ACME1.0").compare(&v("1.00,ACME2.0")),
            VersionOrdering::Inconsistent
        );
        assert_eq!(v("ACME1.0").compare(&v("1.00")), VersionOrdering::Inconsistent);
    }

    #[test]
    fn test_default_version() {
        assert_eq!(VersionString::default(), v("1.00"));
        assert_eq!(VersionString::default().to_string(), VersionString::DEFAULT);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.02,X3.4")).unwrap();
        assert_eq!(json, "\"1.02,X3.4\"");
        let parsed: VersionString = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, v("1.02,X3.4"));
        assert!(serde_json::from_str::<VersionString>("\"bogus\"").is_err());
    }
}
