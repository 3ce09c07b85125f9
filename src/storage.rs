//! Destination folder discipline: deterministic names and atomic writes.
//!
//! The destination folder is the run's only shared mutable resource. Its
//! entire concurrency-safety story is the pre-existence check plus the
//! temp-file-and-rename write below: a crash mid-write never leaves a partial
//! file under a final name, so an existing file can always be trusted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::TariffId;

/// Deterministic destination filename for one tariff export.
pub fn export_path(dest: &Path, id: &TariffId) -> PathBuf {
    dest.join(format!("tariff-{}.xml", sanitize_filename(id.as_str())))
}

/// Create the destination folder. Failure here is unrecoverable for the run.
pub fn ensure_dest(dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Destination folder {} is not writable", dest.display()))
}

/// Write bytes to a temp file in the same directory, then rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .context("Export path has no parent directory")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Trim and limit length; truncate on char boundaries, ids are opaque
    // website-defined strings and may contain multibyte characters
    let trimmed = sanitized.trim().trim_matches('_');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_path_is_deterministic() {
        let dest = Path::new("/out");
        let id = TariffId::from("12345");
        assert_eq!(export_path(dest, &id), PathBuf::from("/out/tariff-12345.xml"));
        assert_eq!(export_path(dest, &id), export_path(dest, &id));
    }

    #[test]
    fn test_export_path_sanitizes_hostile_ids() {
        let dest = Path::new("/out");
        let id = TariffId::from("../../etc/passwd");
        let path = export_path(dest, &id);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(!name.contains('/'));
        assert!(name.starts_with("tariff-"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a:b*c"), "a_b_c");
        assert_eq!(sanitize_filename("  plain  "), "plain");
        assert_eq!(sanitize_filename(""), "export");
    }

    #[test]
    fn test_sanitize_filename_truncates_long_multibyte_names() {
        let long = "日".repeat(40); // 120 bytes, 40 chars
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.chars().count(), 40);

        let very_long = "日".repeat(150);
        let sanitized = sanitize_filename(&very_long);
        assert_eq!(sanitized.chars().count(), 100);
    }

    #[test]
    fn test_write_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tariff-1.xml");
        write_atomic(&path, b"<?xml version=\"1.0\"?><tariff/>").unwrap();

        let saved = fs::read(&path).unwrap();
        assert_eq!(saved, b"<?xml version=\"1.0\"?><tariff/>");

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tariff-2.xml");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
