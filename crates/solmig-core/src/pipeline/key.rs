//! Repository identity used as the cache key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{MigrationError, MigrationResult};

/// `owner/name` pair identifying one repository. Comparison is
/// case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoKey {
    pub owner: String,
    pub name: String,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> MigrationResult<Self> {
        let owner = owner.into();
        let name = name.into();
        if !valid_segment(&owner) || !valid_segment(&name) {
            return Err(MigrationError::InvalidRepository(format!("{owner}/{name}")));
        }
        Ok(Self { owner, name })
    }

    /// Parse `owner/name`, `https://host/owner/name[.git][/]` or
    /// `git@host:owner/name[.git]`.
    pub fn parse(identifier: &str) -> MigrationResult<Self> {
        let invalid = || MigrationError::InvalidRepository(identifier.to_string());
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let path = if let Some(rest) = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
        {
            // Drop the host.
            rest.split_once('/').map(|(_, path)| path).ok_or_else(invalid)?
        } else if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path).ok_or_else(invalid)?
        } else if trimmed.contains("://") {
            return Err(invalid());
        } else {
            trimmed
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => Self::new(owner, name).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepoKey::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let expected = RepoKey::new("acme", "vaults").unwrap();
        for input in [
            "acme/vaults",
            " acme/vaults ",
            "https://github.com/acme/vaults",
            "https://github.com/acme/vaults.git",
            "https://github.com/acme/vaults/",
            "git@github.com:acme/vaults.git",
        ] {
            assert_eq!(RepoKey::parse(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        let lower = RepoKey::parse("acme/vaults").unwrap();
        let upper = RepoKey::parse("Acme/Vaults").unwrap();
        assert_ne!(lower, upper);
        assert_eq!(upper.to_string(), "Acme/Vaults");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "acme",
            "acme/",
            "/vaults",
            "acme/vaults/extra",
            "https://github.com",
            "ftp://host/acme/vaults",
            "acme/va ults",
            "../vaults",
        ] {
            let err = RepoKey::parse(input).unwrap_err();
            assert!(matches!(err, MigrationError::InvalidRepository(_)), "{input}");
        }
    }

    #[test]
    fn test_serde_and_from_str() {
        let key: RepoKey = "acme/vaults".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"owner":"acme","name":"vaults"}"#);
        assert_eq!(key.url(), "https://github.com/acme/vaults");
    }
}
