//! etcd member spec stored in disk tags
//!
//! The tag value reads `<member>/<peer>,<peer>,...`. Peers are kept sorted so
//! that formatting is stable.

use crate::error::{CoreError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    pub member: String,
    pub peers: Vec<String>,
}

impl MemberSpec {
    pub fn new(member: impl Into<String>, peers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut peers: Vec<String> = peers.into_iter().map(Into::into).collect();
        peers.sort();
        Self {
            member: member.into(),
            peers,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidMemberSpec {
            value: value.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = value.split('/').collect();
        let [member, peers] = parts.as_slice() else {
            return Err(invalid("expected exactly one '/'"));
        };
        if member.is_empty() {
            return Err(invalid("member name is empty"));
        }

        let peers: Vec<String> = if peers.is_empty() {
            Vec::new()
        } else {
            peers.split(',').map(str::to_string).collect()
        };
        if peers.iter().any(String::is_empty) {
            return Err(invalid("empty peer name"));
        }

        Ok(Self {
            member: member.to_string(),
            peers,
        })
    }
}

impl fmt::Display for MemberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.member, self.peers.join(","))
    }
}

impl FromStr for MemberSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sorts_peers() {
        let spec = MemberSpec::new("a", ["c", "a", "b"]);
        assert_eq!(spec.to_string(), "a/a,b,c");
    }

    #[test]
    fn test_round_trip() {
        for value in ["a/a,b,c", "m1/m1", "x/"] {
            let spec = MemberSpec::parse(value).unwrap();
            assert_eq!(spec.to_string(), value);
            assert_eq!(MemberSpec::parse(&spec.to_string()).unwrap(), spec);
        }

        let spec = MemberSpec::new("b", ["b", "a"]);
        assert_eq!(MemberSpec::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MemberSpec::parse("a").is_err());
        assert!(MemberSpec::parse("a/b/c").is_err());
        assert!(MemberSpec::parse("/a,b").is_err());
        assert!(MemberSpec::parse("a/a,,b").is_err());
    }
}
