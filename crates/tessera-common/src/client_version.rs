//! Client build identity: `build,source,protocol`.
//!
//! Clients announce which builds they can run as comma-joined triplets. The
//! identity is advisory; it feeds diagnostics and sorted status displays and
//! never decides admission on its own. Anything that is not exactly three
//! comma-separated tokens parses as [`ClientBuildIdentity::Unknown`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Token reported for every field of an unparseable identity
pub const UNKNOWN: &str = "Unknown";

/// Build identity of a client library
#[derive(Debug, Clone, Default)]
pub enum ClientBuildIdentity {
    /// A well-formed triplet
    Known {
        build: String,
        source: String,
        protocol: String,
    },
    /// The sentinel substituted for malformed input
    #[default]
    Unknown,
}

impl ClientBuildIdentity {
    pub fn new(
        build: impl Into<String>,
        source: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self::Known {
            build: build.into(),
            source: source.into(),
            protocol: protocol.into(),
        }
    }

    /// Parse a `build,source,protocol` token, falling back to `Unknown`
    pub fn parse(token: &str) -> Self {
        if token.matches(',').count() != 2 {
            return Self::Unknown;
        }

        let mut parts = token.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(build), Some(source), Some(protocol)) => Self::new(build, source, protocol),
            _ => Self::Unknown,
        }
    }

    pub fn build(&self) -> &str {
        match self {
            Self::Known { build, .. } => build,
            Self::Unknown => UNKNOWN,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Known { source, .. } => source,
            Self::Unknown => UNKNOWN,
        }
    }

    pub fn protocol(&self) -> &str {
        match self {
            Self::Known { protocol, .. } => protocol,
            Self::Unknown => UNKNOWN,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Comparison key: protocol first, then build, then source.
    ///
    /// Build and source tags carry no real ordering; their relative
    /// precedence only keeps sorted displays stable.
    fn sort_key(&self) -> (&str, &str, &str) {
        (self.protocol(), self.build(), self.source())
    }
}

impl PartialEq for ClientBuildIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for ClientBuildIdentity {}

impl Hash for ClientBuildIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl PartialOrd for ClientBuildIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClientBuildIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for ClientBuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.build(), self.source(), self.protocol())
    }
}

impl FromStr for ClientBuildIdentity {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for ClientBuildIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientBuildIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(Self::parse(&token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let id = ClientBuildIdentity::new("6.3.1", "a1b2c3", "fdb00b063010001");
        let parsed = ClientBuildIdentity::parse(&id.to_string());

        assert_eq!(parsed.build(), "6.3.1");
        assert_eq!(parsed.source(), "a1b2c3");
        assert_eq!(parsed.protocol(), "fdb00b063010001");
        assert!(!parsed.is_unknown());
    }

    #[test]
    fn test_malformed_tokens_become_unknown() {
        for token in ["garbage", "6.3.1,a1b2c3", "a,b,c,d", ""] {
            let parsed = ClientBuildIdentity::parse(token);
            assert!(parsed.is_unknown(), "{token:?} should not parse");
            assert_eq!(parsed.to_string(), "Unknown,Unknown,Unknown");
        }
    }

    #[test]
    fn test_empty_tokens_are_still_known() {
        let parsed = ClientBuildIdentity::parse(",,");
        assert!(!parsed.is_unknown());
        assert_eq!(parsed.build(), "");
    }

    #[test]
    fn test_ordering_precedence() {
        // Protocol dominates even when build would order the other way
        let a = ClientBuildIdentity::new("9.0", "zzz", "p1");
        let b = ClientBuildIdentity::new("1.0", "aaa", "p2");
        assert!(a < b);

        // Same protocol: build before source
        let c = ClientBuildIdentity::new("1.0", "zzz", "p1");
        let d = ClientBuildIdentity::new("2.0", "aaa", "p1");
        assert!(c < d);

        // Same protocol and build: source decides
        let e = ClientBuildIdentity::new("1.0", "aaa", "p1");
        assert!(e < c);
    }

    #[test]
    fn test_sorting_dedups_unknown_sentinel() {
        let mut ids = vec![
            ClientBuildIdentity::parse("garbage"),
            ClientBuildIdentity::new("6.2", "x", "p9"),
            ClientBuildIdentity::new(UNKNOWN, UNKNOWN, UNKNOWN),
            ClientBuildIdentity::new("6.2", "x", "p1"),
        ];
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].protocol(), "Unknown");
        assert_eq!(ids[1].protocol(), "p1");
        assert_eq!(ids[2].protocol(), "p9");
    }

    #[test]
    fn test_serde_never_fails_on_content() {
        let parsed: Vec<ClientBuildIdentity> =
            serde_json::from_str(r#"["6.3.1,abc,p1", "nope"]"#).unwrap();
        assert_eq!(parsed[0].build(), "6.3.1");
        assert!(parsed[1].is_unknown());

        let json = serde_json::to_string(&parsed[0]).unwrap();
        assert_eq!(json, r#""6.3.1,abc,p1""#);
    }
}
