//! README/CHANGELOG extraction from artifact ZIP bytes.
//!
//! Given an artifact's raw ZIP bytes in memory, locates the first entry
//! whose base name matches one of a side artifact's accepted names, case
//! insensitively, preferring `.md` over `.mdown` when both are present.

use std::io::{Cursor, Read};

use zip::ZipArchive;

/// Literal body written to a side-artifact storage key when extraction
/// found nothing, so the miss is not re-derived on every request.
pub const NOT_FOUND_SENTINEL: &[u8] = b"NOT_FOUND";

/// Which side artifact to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideArtifact {
    Readme,
    Changelog,
}

impl SideArtifact {
    fn base_names(self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            SideArtifact::Readme => (
                &["readme.md"],
                &["readme.mdown"],
            ),
            SideArtifact::Changelog => (
                &["changelog.md"],
                &["changelog.mdown"],
            ),
        }
    }

    /// The suffix appended to an artifact's storage key for this side artifact.
    pub fn key_suffix(self) -> &'static str {
        match self {
            SideArtifact::Readme => ".readme.md",
            SideArtifact::Changelog => ".changelog.md",
        }
    }
}

/// Extracts the matching side artifact from in-memory ZIP bytes.
///
/// Returns `Some(bytes)` on a hit (UTF-8 is not required of the caller —
/// the raw file bytes are returned as-is), `None` if no matching entry
/// exists or the archive cannot be parsed.
pub fn extract(zip_bytes: &[u8], which: SideArtifact) -> Option<Vec<u8>> {
    let cursor = Cursor::new(zip_bytes);
    let mut archive = ZipArchive::new(cursor).ok()?;

    let (preferred, fallback) = which.base_names();
    let mut preferred_hit: Option<usize> = None;
    let mut fallback_hit: Option<usize> = None;

    for i in 0..archive.len() {
        let name = {
            let entry = archive.by_index(i).ok()?;
            if entry.is_dir() {
                continue;
            }
            entry.name().to_string()
        };
        let base = name
            .rsplit('/')
            .next()
            .unwrap_or(name.as_str())
            .to_ascii_lowercase();

        if preferred.contains(&base.as_str()) && preferred_hit.is_none() {
            preferred_hit = Some(i);
        } else if fallback.contains(&base.as_str()) && fallback_hit.is_none() {
            fallback_hit = Some(i);
        }
    }

    let idx = preferred_hit.or(fallback_hit)?;
    let mut entry = archive.by_index(idx).ok()?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn finds_readme_case_insensitively() {
        let zip = build_zip(&[("vendor/pkg/README.MD", "hello world")]);
        let found = extract(&zip, SideArtifact::Readme).unwrap();
        assert_eq!(found, b"hello world");
    }

    #[test]
    fn md_wins_over_mdown_when_both_present() {
        let zip = build_zip(&[
            ("README.mdown", "fallback"),
            ("README.md", "preferred"),
        ]);
        let found = extract(&zip, SideArtifact::Readme).unwrap();
        assert_eq!(found, b"preferred");
    }

    #[test]
    fn missing_entry_returns_none() {
        let zip = build_zip(&[("src/lib.rs", "fn main() {}")]);
        assert!(extract(&zip, SideArtifact::Readme).is_none());
        assert!(extract(&zip, SideArtifact::Changelog).is_none());
    }
}
