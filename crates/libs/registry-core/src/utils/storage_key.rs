//! BlobStore key construction and parsing.
//!
//! Artifact keys have the shape `{visibility}/{repo}/{name}/{version}.zip`;
//! side artifacts append `.readme.md` or `.changelog.md`. `visibility` is
//! `public` for the well-known `packagist` repository and `private`
//! otherwise — credentials never leak into the key itself.

use crate::error::{Error, Result};
use crate::utils::zip_extract::SideArtifact;

const PACKAGIST_REPO_ID: &str = "packagist";

fn visibility_for(repo_id: &str) -> &'static str {
    if repo_id == PACKAGIST_REPO_ID {
        "public"
    } else {
        "private"
    }
}

/// Builds the storage key for an artifact's ZIP bytes.
pub fn build(repo_id: &str, name: &str, version: &str) -> String {
    format!("{}/{}/{}/{}.zip", visibility_for(repo_id), repo_id, name, version)
}

/// Builds the storage key for a side artifact (README/CHANGELOG).
pub fn build_side(repo_id: &str, name: &str, version: &str, which: SideArtifact) -> String {
    format!(
        "{}/{}/{}/{}{}",
        visibility_for(repo_id),
        repo_id,
        name,
        version,
        which.key_suffix()
    )
}

/// The parsed components of an artifact storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub visibility: String,
    pub repo_id: String,
    pub name: String,
    pub version: String,
}

/// Parses a key built by [`build`]. Side-artifact suffixes are not
/// accepted here; strip them before calling if needed.
pub fn parse(key: &str) -> Result<ParsedKey> {
    let stripped = key
        .strip_suffix(".zip")
        .ok_or_else(|| Error::InvalidStorageKey(key.to_string()))?;
    let mut parts = stripped.splitn(3, '/');
    let visibility = parts
        .next()
        .ok_or_else(|| Error::InvalidStorageKey(key.to_string()))?;
    let repo_id = parts
        .next()
        .ok_or_else(|| Error::InvalidStorageKey(key.to_string()))?;
    let rest = parts
        .next()
        .ok_or_else(|| Error::InvalidStorageKey(key.to_string()))?;
    let (name, version) = rest
        .rsplit_once('/')
        .ok_or_else(|| Error::InvalidStorageKey(key.to_string()))?;

    Ok(ParsedKey {
        visibility: visibility.to_string(),
        repo_id: repo_id.to_string(),
        name: name.to_string(),
        version: version.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_private_repo() {
        let key = build("my-repo", "vendor/pkg", "1.2.3");
        assert_eq!(key, "private/my-repo/vendor/pkg/1.2.3.zip");
        let parsed = parse(&key).unwrap();
        assert_eq!(parsed.visibility, "private");
        assert_eq!(parsed.repo_id, "my-repo");
        assert_eq!(parsed.name, "vendor/pkg");
        assert_eq!(parsed.version, "1.2.3");
    }

    #[test]
    fn packagist_is_public() {
        let key = build("packagist", "monolog/monolog", "2.0.0");
        assert!(key.starts_with("public/packagist/"));
    }

    #[test]
    fn side_artifact_suffix() {
        let key = build_side("packagist", "a/b", "1.0.0", SideArtifact::Readme);
        assert!(key.ends_with(".readme.md"));
        let key = build_side("packagist", "a/b", "1.0.0", SideArtifact::Changelog);
        assert!(key.ends_with(".changelog.md"));
    }

    #[test]
    fn rejects_malformed_key() {
        assert!(parse("not-a-key").is_err());
        assert!(parse("public/repo/name.zip").is_err());
    }
}
