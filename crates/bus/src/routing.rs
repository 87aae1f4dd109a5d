//! Routing keys and binding patterns for the topic exchange.
//!
//! A routing key is one or more `[A-Za-z0-9_-]+` tokens joined by `.`. A
//! pattern uses the same grammar plus two wildcard tokens: `*` matches
//! exactly one token and `#` matches one or more tokens. Matching is
//! anchored; the whole key must be consumed.

use std::fmt;
use std::str::FromStr;

use crate::error::RoutingError;

fn is_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A dot-separated routing key attached to every published message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Parses a routing key, rejecting empty input and invalid tokens.
    pub fn new(key: impl Into<String>) -> Result<Self, RoutingError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RoutingError::Empty);
        }
        if let Some(token) = key.split('.').find(|token| !is_token(token)) {
            return Err(RoutingError::InvalidToken {
                token: token.to_string(),
                input: key.clone(),
            });
        }
        Ok(Self(key))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn tokens(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoutingKey {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PatternToken {
    Literal(String),
    /// `*`: exactly one token.
    AnyOne,
    /// `#`: one or more tokens. Deliberately not the zero-or-more of
    /// stock AMQP brokers.
    AnyMany,
}

/// A binding pattern: the routing-key grammar extended with wildcards.
///
/// Parsed once at construction; matching walks the compiled tokens.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    tokens: Vec<PatternToken>,
}

impl Pattern {
    /// Parses a pattern, rejecting empty input and invalid tokens.
    pub fn new(pattern: impl Into<String>) -> Result<Self, RoutingError> {
        let source = pattern.into();
        if source.is_empty() {
            return Err(RoutingError::Empty);
        }
        let mut tokens = Vec::new();
        for token in source.split('.') {
            tokens.push(match token {
                "*" => PatternToken::AnyOne,
                "#" => PatternToken::AnyMany,
                literal if is_token(literal) => PatternToken::Literal(literal.to_string()),
                other => {
                    return Err(RoutingError::InvalidToken {
                        token: other.to_string(),
                        input: source.clone(),
                    });
                }
            });
        }
        Ok(Self { source, tokens })
    }

    /// Whether `key` matches this pattern in its entirety.
    #[must_use]
    pub fn matches(&self, key: &RoutingKey) -> bool {
        matches_at(&self.tokens, &key.tokens())
    }

    /// Whether the pattern contains no wildcard tokens.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| matches!(token, PatternToken::Literal(_)))
    }

    /// The pattern as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Pattern {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn matches_at(pattern: &[PatternToken], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((PatternToken::Literal(literal), rest)) => key
            .split_first()
            .is_some_and(|(head, tail)| head == literal && matches_at(rest, tail)),
        Some((PatternToken::AnyOne, rest)) => key
            .split_first()
            .is_some_and(|(_, tail)| matches_at(rest, tail)),
        Some((PatternToken::AnyMany, rest)) => {
            // `#` consumes at least one token; backtrack over the remainder.
            (1..=key.len()).any(|taken| matches_at(rest, &key[taken..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RoutingKey {
        RoutingKey::new(s).unwrap()
    }

    fn pattern(s: &str) -> Pattern {
        Pattern::new(s).unwrap()
    }

    #[test]
    fn rejects_empty_key() {
        assert_eq!(RoutingKey::new(""), Err(RoutingError::Empty));
    }

    #[test]
    fn rejects_bad_tokens() {
        for input in ["a..b", ".a", "a.", "a b", "a.&.b", "order.*"] {
            assert!(RoutingKey::new(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn accepts_token_charset() {
        for input in ["a", "order.placed", "a-b.c_d.E9"] {
            assert!(RoutingKey::new(input).is_ok(), "rejected {input:?}");
        }
    }

    #[test]
    fn rejects_empty_and_malformed_patterns() {
        assert_eq!(Pattern::new(""), Err(RoutingError::Empty));
        assert!(Pattern::new("a.**").is_err());
        assert!(Pattern::new("a.#b").is_err());
        assert!(Pattern::new("a..b").is_err());
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let p = pattern("order.placed");
        assert!(p.matches(&key("order.placed")));
        assert!(!p.matches(&key("order.placed.eu")));
        assert!(!p.matches(&key("order")));
        assert!(!p.matches(&key("order.cancelled")));
        assert!(p.is_literal());
    }

    #[test]
    fn star_matches_exactly_one_token() {
        let p = pattern("order.*");
        assert!(p.matches(&key("order.placed")));
        assert!(!p.matches(&key("order")));
        assert!(!p.matches(&key("order.placed.eu")));

        let two = pattern("*.*");
        assert!(two.matches(&key("a.b")));
        assert!(!two.matches(&key("a")));
        assert!(!two.matches(&key("a.b.c")));

        let mid = pattern("a.*.c");
        assert!(mid.matches(&key("a.b.c")));
        assert!(!mid.matches(&key("a.b.d")));
    }

    #[test]
    fn hash_matches_one_or_more_tokens() {
        let p = pattern("#");
        assert!(p.matches(&key("a")));
        assert!(p.matches(&key("a.b.c.d")));

        let trailing = pattern("order.#");
        assert!(trailing.matches(&key("order.placed")));
        assert!(trailing.matches(&key("order.placed.eu.north")));
        // One-or-more: the bare prefix alone does not match.
        assert!(!trailing.matches(&key("order")));

        let middle = pattern("a.#.z");
        assert!(middle.matches(&key("a.b.z")));
        assert!(middle.matches(&key("a.b.c.d.z")));
        assert!(!middle.matches(&key("a.z")));
    }

    #[test]
    fn wildcards_compose() {
        let p = pattern("*.#");
        assert!(p.matches(&key("a.b")));
        assert!(p.matches(&key("a.b.c")));
        assert!(!p.matches(&key("a")));
        assert!(!p.is_literal());
    }
}
