//! Short, human-shareable endpoint identifiers.
//!
//! An [`EndpointId`] is the only addressing token peers exchange: four
//! characters drawn from `A-Z0-9`, short enough to read out loud or type on
//! a phone. Uniqueness is enforced by the broker at registration time, not
//! here.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Characters an endpoint id may contain.
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of characters in an endpoint id.
pub const ID_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEndpointId {
    #[error("endpoint id must be 4 characters, got {0}")]
    Length(usize),
    #[error("endpoint id contains invalid character {0:?}")]
    Character(char),
}

/// Identifier of one endpoint (peer session).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    /// Draws a fresh candidate id uniformly from [`ID_ALPHABET`].
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let id = (0..ID_LEN)
            .map(|_| {
                ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char
            })
            .collect();
        Self(id)
    }

    /// Parses user input, trimming whitespace and upper-casing it first.
    pub fn parse_lenient(input: &str) -> Result<Self, InvalidEndpointId> {
        input.trim().to_ascii_uppercase().parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EndpointId {
    type Err = InvalidEndpointId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len != ID_LEN {
            return Err(InvalidEndpointId::Length(len));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !c.is_ascii() || !ID_ALPHABET.contains(&(*c as u8)))
        {
            return Err(InvalidEndpointId::Character(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

impl Serialize for EndpointId {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EndpointId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn random_ids_use_alphabet() {
        for _ in 0..200 {
            let id = EndpointId::random();
            assert_eq!(id.as_str().len(), ID_LEN);
            assert!(id.as_str().bytes().all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[rstest]
    #[case("AB12")]
    #[case("ZZZZ")]
    #[case("0000")]
    fn parses_valid_ids(#[case] raw: &str) {
        let id: EndpointId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[rstest]
    #[case("ABC", InvalidEndpointId::Length(3))]
    #[case("ABCDE", InvalidEndpointId::Length(5))]
    #[case("ab12", InvalidEndpointId::Character('a'))]
    #[case("AB-2", InvalidEndpointId::Character('-'))]
    #[case("ABÉ2", InvalidEndpointId::Character('É'))]
    fn rejects_invalid_ids(
        #[case] raw: &str,
        #[case] expected: InvalidEndpointId,
    ) {
        assert_eq!(raw.parse::<EndpointId>().unwrap_err(), expected);
    }

    #[test]
    fn lenient_parse_normalises_input() {
        let id = EndpointId::parse_lenient("  ab12 \n").unwrap();
        assert_eq!(id.as_str(), "AB12");
    }

    #[test]
    fn serde_uses_plain_string() {
        let id: EndpointId = "K9Q2".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"K9Q2\"");
        let back: EndpointId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<EndpointId>("\"k9\"").is_err());
    }
}
