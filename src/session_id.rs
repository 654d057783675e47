//! Session and video identifiers
//!
//! A [`SessionId`] names one playthrough of one video. Every alarm and
//! submission ticket carries the id of the session it was created for, so
//! anything addressed to a replaced or torn-down session can be recognised
//! and dropped. Session ids are displayed as 16 hex digits.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

/// A unique identifier for a video playthrough
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new random session ID
    pub fn new() -> Self {
        Self(fastrand::u64(..))
    }

    /// Creates a new random session ID guaranteed to differ from `previous`
    pub fn next_after(previous: SessionId) -> Self {
        loop {
            let candidate = Self::new();
            if candidate != previous {
                return candidate;
            }
        }
    }
}

impl Default for SessionId {
    /// Creates a new random session ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    /// Formats the session ID as a 16-digit hexadecimal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SessionId {
    /// Serializes the session ID as a hex string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    /// Deserializes a session ID from a hex string
    fn deserialize<D>(deserializer: D) -> Result<SessionId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SessionId::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl FromStr for SessionId {
    type Err = ParseIntError;

    /// Parses a session ID from its hex representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string is not a valid hexadecimal
    /// `u64`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u64::from_str_radix(s, 16)?))
    }
}

/// Opaque identifier of a video, as handed out by the backend
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VideoId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
