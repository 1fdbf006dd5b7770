//! Node identifiers and aliases.
//!
//! Ids are `wv-` followed by six lowercase hex characters taken from a
//! SHA-256 of a ULID (time + randomness) and the process id.

use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::error::{Error, Result};

pub const ID_PREFIX: &str = "wv-";
pub const ID_HEX_LEN: usize = 6;
const ALIAS_MAX_LEN: usize = 64;

/// Generate a fresh candidate id. Callers check for collisions.
pub fn generate_id() -> String {
    let seed = format!("{}:{}", Ulid::new(), std::process::id());
    let digest = Sha256::digest(seed.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(ID_HEX_LEN);
    format!("{ID_PREFIX}{encoded}")
}

/// Whether `value` is a well-formed id.
pub fn is_valid_id(value: &str) -> bool {
    value
        .strip_prefix(ID_PREFIX)
        .is_some_and(|hex| {
            hex.len() == ID_HEX_LEN
                && hex
                    .chars()
                    .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
        })
}

/// Whether `value` looks like an id attempt (prefix present).
pub fn looks_like_id(value: &str) -> bool {
    value.starts_with(ID_PREFIX)
}

/// Validate an alias. Aliases cannot collide with the id namespace.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() {
        return Err(Error::Validation("alias cannot be empty".to_string()));
    }
    if alias.len() > ALIAS_MAX_LEN {
        return Err(Error::Validation(format!(
            "alias '{alias}' exceeds {ALIAS_MAX_LEN} characters"
        )));
    }
    if looks_like_id(alias) {
        return Err(Error::Validation(format!(
            "alias '{alias}' cannot start with '{ID_PREFIX}'"
        )));
    }
    if !alias
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(Error::Validation(format!(
            "alias '{alias}' may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

/// Classification of a user-supplied node reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Id(&'a str),
    Alias(&'a str),
}

/// Classify a reference, rejecting malformed ids outright.
pub fn parse_ref(input: &str) -> Result<NodeRef<'_>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("node reference cannot be empty".to_string()));
    }
    if looks_like_id(trimmed) {
        if !is_valid_id(trimmed) {
            return Err(Error::Validation(format!(
                "malformed node id '{trimmed}': expected {ID_PREFIX} followed by {ID_HEX_LEN} hex characters"
            )));
        }
        return Ok(NodeRef::Id(trimmed));
    }
    validate_alias(trimmed)?;
    Ok(NodeRef::Alias(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_well_formed() {
        for _ in 0..100 {
            let id = generate_id();
            assert!(is_valid_id(&id), "bad id {id}");
            assert_eq!(id.len(), ID_PREFIX.len() + ID_HEX_LEN);
        }
    }

    #[test]
    fn parse_ref_classifies() {
        assert_eq!(parse_ref("wv-0a1b2c").unwrap(), NodeRef::Id("wv-0a1b2c"));
        assert_eq!(parse_ref(" auth-epic ").unwrap(), NodeRef::Alias("auth-epic"));
        assert!(matches!(parse_ref("wv-XYZ"), Err(Error::Validation(_))));
        assert!(matches!(parse_ref("wv-0a1b2c3"), Err(Error::Validation(_))));
        assert!(matches!(parse_ref("has space"), Err(Error::Validation(_))));
        assert!(matches!(parse_ref(""), Err(Error::Validation(_))));
    }

    #[test]
    fn alias_cannot_shadow_ids() {
        assert!(validate_alias("wv-abcdef").is_err());
        assert!(validate_alias("release.1_x").is_ok());
    }
}
