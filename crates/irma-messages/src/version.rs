//! Protocol version negotiation value types.
//!
//! Versions travel as `"major.minor"` strings, both in the version headers the
//! client sends and inside protocol messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Header on which the client advertises the lowest protocol version it accepts.
pub const MIN_VERSION_HEADER: &str = "X-IRMA-MinProtocolVersion";
/// Header on which the client advertises the highest protocol version it accepts.
pub const MAX_VERSION_HEADER: &str = "X-IRMA-MaxProtocolVersion";
/// Bearer-style authorization header used by both frontend and client.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Lowest client protocol version the server speaks.
pub const MIN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 4);
/// Highest client protocol version the server speaks.
pub const MAX_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 8);

/// Lowest frontend protocol version the server speaks.
pub const MIN_FRONTEND_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0);
/// Highest frontend protocol version the server speaks.
pub const MAX_FRONTEND_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 1);

/// A `major.minor` protocol version.
///
/// Ordering is lexicographic on `(major, minor)`, which is exactly version
/// precedence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Returns true if this version is strictly below `major.minor`.
    pub fn below(&self, major: u8, minor: u8) -> bool {
        *self < ProtocolVersion::new(major, minor)
    }

    /// Returns true if this version is strictly above `major.minor`.
    pub fn above(&self, major: u8, minor: u8) -> bool {
        *self > ProtocolVersion::new(major, minor)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error parsing a `"major.minor"` version string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid protocol version `{0}`: not of the form major.minor")]
pub struct ParseVersionError(pub String);

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| ParseVersionError(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| ParseVersionError(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata format byte the issuer uses for a client on the given protocol
/// version. Clients below 2.3 cannot handle optional attributes.
pub fn metadata_version(v: ProtocolVersion) -> u8 {
    if v.below(2, 3) {
        0x02
    } else {
        0x03
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(ProtocolVersion::new(2, 4) < ProtocolVersion::new(2, 8));
        assert!(ProtocolVersion::new(2, 8) < ProtocolVersion::new(3, 0));
        assert!(ProtocolVersion::new(2, 5).above(2, 4));
        assert!(ProtocolVersion::new(2, 5).below(2, 6));
        assert!(!ProtocolVersion::new(2, 5).below(2, 5));
    }

    #[test]
    fn test_version_parse_roundtrip() {
        let v: ProtocolVersion = "2.8".parse().unwrap();
        assert_eq!(v, ProtocolVersion::new(2, 8));
        assert_eq!(v.to_string(), "2.8");

        assert!("2".parse::<ProtocolVersion>().is_err());
        assert!("2.x".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_version_serde_as_string() {
        let json = serde_json::to_string(&ProtocolVersion::new(2, 7)).unwrap();
        assert_eq!(json, "\"2.7\"");
        let v: ProtocolVersion = serde_json::from_str("\"2.7\"").unwrap();
        assert_eq!(v, ProtocolVersion::new(2, 7));
    }

    #[test]
    fn test_metadata_version() {
        assert_eq!(metadata_version(ProtocolVersion::new(2, 2)), 0x02);
        assert_eq!(metadata_version(ProtocolVersion::new(2, 3)), 0x03);
        assert_eq!(metadata_version(ProtocolVersion::new(2, 8)), 0x03);
    }
}
