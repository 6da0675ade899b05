// ABOUTME: DNS-label names for applications and databases.
// ABOUTME: Names end up in container names and hostnames, so they follow RFC 1123.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceNameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name exceeds maximum length of {MAX_LEN} characters")]
    TooLong,

    #[error("name must start and end with a letter or digit")]
    BadEdge,

    #[error("invalid character in name: '{0}'")]
    InvalidChar(char),
}

/// A declared name of an application or stateful service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(value: &str) -> Result<Self, ResourceNameError> {
        if value.is_empty() {
            return Err(ResourceNameError::Empty);
        }
        if value.len() > MAX_LEN {
            return Err(ResourceNameError::TooLong);
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(ResourceNameError::BadEdge);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
        {
            return Err(ResourceNameError::InvalidChar(c));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lowercase `input` and collapse every run of other characters into one hyphen.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ResourceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResourceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_labels() {
        assert!(ResourceName::new("orders-db").is_ok());
        assert!(ResourceName::new("a1").is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(ResourceName::new(""), Err(ResourceNameError::Empty));
        assert_eq!(ResourceName::new("-db"), Err(ResourceNameError::BadEdge));
        assert_eq!(
            ResourceName::new("Orders"),
            Err(ResourceNameError::InvalidChar('O'))
        );
        assert_eq!(
            ResourceName::new(&"a".repeat(64)),
            Err(ResourceNameError::TooLong)
        );
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Build #42 / Web"), "build-42-web");
        assert_eq!(slugify("--x--"), "x");
    }
}
