//! Code source domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Kind of repository a model's code is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    LocalFile,
    Svn,
    Git,
    Http,
    HttpZip,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::LocalFile => "local_file",
            RepositoryKind::Svn => "svn",
            RepositoryKind::Git => "git",
            RepositoryKind::Http => "http",
            RepositoryKind::HttpZip => "http_zip",
        }
    }

    /// Whether `revision` is meaningful for this kind of repository
    ///
    /// Unversioned kinds accept anything, including the empty string.
    pub fn is_valid_revision(&self, revision: &str) -> bool {
        match self {
            RepositoryKind::Svn => revision.parse::<u64>().is_ok(),
            RepositoryKind::Git => !revision.is_empty(),
            RepositoryKind::LocalFile | RepositoryKind::Http | RepositoryKind::HttpZip => true,
        }
    }
}

impl FromStr for RepositoryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_file" | "local" => Ok(RepositoryKind::LocalFile),
            "svn" => Ok(RepositoryKind::Svn),
            "git" => Ok(RepositoryKind::Git),
            "http" => Ok(RepositoryKind::Http),
            "http_zip" => Ok(RepositoryKind::HttpZip),
            other => Err(ConfigError::UnknownRepositoryKind(other.to_string())),
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the model code a run executes
///
/// The revision is empty for unversioned repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeSource {
    pub uri: String,
    pub kind: RepositoryKind,
    pub revision: String,
}

impl CodeSource {
    pub fn new(uri: impl Into<String>, kind: RepositoryKind, revision: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind,
            revision: revision.into(),
        }
    }

    /// Code in a local directory, unversioned
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(path, RepositoryKind::LocalFile, "")
    }
}

impl fmt::Display for CodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision.is_empty() {
            write!(f, "{} ({})", self.uri, self.kind)
        } else {
            write!(f, "{}@{} ({})", self.uri, self.revision, self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_kind_roundtrip() {
        for kind in [
            RepositoryKind::LocalFile,
            RepositoryKind::Svn,
            RepositoryKind::Git,
            RepositoryKind::Http,
            RepositoryKind::HttpZip,
        ] {
            assert_eq!(kind.as_str().parse::<RepositoryKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_repository_kind() {
        assert_eq!(
            "ftp".parse::<RepositoryKind>(),
            Err(ConfigError::UnknownRepositoryKind("ftp".to_string()))
        );
    }

    #[test]
    fn test_svn_revision_must_be_numeric() {
        assert!(RepositoryKind::Svn.is_valid_revision("1234"));
        assert!(!RepositoryKind::Svn.is_valid_revision("head"));
        assert!(RepositoryKind::LocalFile.is_valid_revision(""));
    }
}
