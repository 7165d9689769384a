//! Container ID generation and prefix resolution.

use crate::error::{Result, StevedoreError};

/// Length of a full container ID in hex characters (32 random bytes).
pub const FULL_LEN: usize = 64;

/// Length of the display form used in listings and suggested names.
pub const SHORT_LEN: usize = 12;

/// Generates a fresh 256-bit container ID as lowercase hex.
pub fn generate() -> String {
    let mut id = String::with_capacity(FULL_LEN);
    for _ in 0..4 {
        id.push_str(&format!("{:016x}", fastrand::u64(..)));
    }
    id
}

/// Display form of an ID: the leading 12 characters.
pub fn truncate(id: &str) -> &str {
    &id[..SHORT_LEN.min(id.len())]
}

pub fn is_valid(id: &str) -> bool {
    id.len() == FULL_LEN && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Resolves an ID prefix against a set of candidate IDs. Exactly one match
/// is required; several matches fail with an ambiguity error rather than
/// picking one.
pub fn resolve_prefix<I>(candidates: I, prefix: &str) -> Result<String>
where
    I: IntoIterator<Item = String>,
{
    if prefix.is_empty() {
        return Err(StevedoreError::InvalidInput(
            "container ID prefix must not be empty".into(),
        ));
    }

    let mut found = None;
    for id in candidates {
        if !id.starts_with(prefix) {
            continue;
        }
        if found.is_some() {
            return Err(StevedoreError::AmbiguousId(prefix.to_string()));
        }
        found = Some(id);
    }

    found.ok_or_else(|| StevedoreError::NotFound(format!("no such container: {prefix}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let id = generate();
        assert_eq!(id.len(), FULL_LEN);
        assert!(is_valid(&id));
        // lowercase hex only
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn test_truncate() {
        let id = generate();
        assert_eq!(truncate(&id).len(), SHORT_LEN);
        assert!(id.starts_with(truncate(&id)));
        assert_eq!(truncate("abc"), "abc");
    }

    #[test]
    fn test_resolve_prefix() {
        let ids = || {
            vec![
                "aabbcc".to_string(),
                "aabbdd".to_string(),
                "ffee00".to_string(),
            ]
        };
        assert_eq!(resolve_prefix(ids(), "ff").unwrap(), "ffee00");
        assert_eq!(resolve_prefix(ids(), "aabbcc").unwrap(), "aabbcc");
        assert!(matches!(
            resolve_prefix(ids(), "aabb"),
            Err(StevedoreError::AmbiguousId(_))
        ));
        assert!(matches!(
            resolve_prefix(ids(), "99"),
            Err(StevedoreError::NotFound(_))
        ));
        assert!(matches!(
            resolve_prefix(ids(), ""),
            Err(StevedoreError::InvalidInput(_))
        ));
    }
}
