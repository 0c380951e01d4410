//! Migration definitions discovered on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::migration::MigrationError;

/// A schema change read from the migrations directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub sql: String,
    pub path: PathBuf,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            version,
            name: name.into(),
            checksum: checksum(&sql),
            sql,
            path: PathBuf::new(),
        }
    }
}

/// Hex-encoded SHA-256 of the migration body.
pub fn checksum(sql: &str) -> String {
    format!("{:x}", Sha256::digest(sql.as_bytes()))
}

/// Split `0007_add_index.sql` or `V7__add_index.sql` into `(7, "add_index")`.
pub fn parse_file_name(file_name: &str) -> Option<(i64, String)> {
    let stem = file_name.strip_suffix(".sql")?;

    let (version, name) = match stem.strip_prefix('V') {
        Some(rest) => rest.split_once("__")?,
        None => stem.split_once('_')?,
    };

    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }

    let version: i64 = version.parse().ok()?;
    (version > 0).then(|| (version, name.to_string()))
}

/// Read every `.sql` file in `dir`, sorted by version ascending.
///
/// Files with other extensions are ignored.
pub fn scan_dir(dir: &Path) -> Result<Vec<Migration>, MigrationError> {
    let scan_err = |source| MigrationError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut by_version: BTreeMap<i64, Migration> = BTreeMap::new();

    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let path = entry.map_err(scan_err)?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let (version, name) = parse_file_name(&file_name)
            .ok_or_else(|| MigrationError::InvalidName(file_name.clone()))?;

        let sql = fs::read_to_string(&path).map_err(|source| MigrationError::Scan {
            path: path.clone(),
            source,
        })?;

        if let Some(existing) = by_version.get(&version) {
            return Err(MigrationError::DuplicateVersion {
                version,
                first: existing.path.clone(),
                second: path,
            });
        }

        by_version.insert(
            version,
            Migration {
                version,
                name,
                checksum: checksum(&sql),
                sql,
                path,
            },
        );
    }

    Ok(by_version.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_both_naming_styles() {
        assert_eq!(parse_file_name("0001_init.sql"), Some((1, "init".into())));
        assert_eq!(
            parse_file_name("V12__add_users_index.sql"),
            Some((12, "add_users_index".into()))
        );
        assert_eq!(
            parse_file_name("20240101_create_orders.sql"),
            Some((20240101, "create_orders".into()))
        );
    }

    #[test]
    fn rejects_unparsable_names() {
        assert_eq!(parse_file_name("init.sql"), None);
        assert_eq!(parse_file_name("0000_zero.sql"), None);
        assert_eq!(parse_file_name("V3_missing_double.sql"), None);
        assert_eq!(parse_file_name("12_.sql"), None);
        assert_eq!(parse_file_name("-4_negative.sql"), None);
        assert_eq!(parse_file_name("0001_init.txt"), None);
    }

    #[test]
    fn checksum_is_stable_sha256() {
        assert_eq!(
            checksum(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum("SELECT 1"), checksum("SELECT 1"));
        assert_ne!(checksum("SELECT 1"), checksum("SELECT 2"));
    }

    #[test]
    fn scan_sorts_by_version_and_skips_other_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("0010_later.sql"), "SELECT 10;").unwrap();
        fs::write(dir.path().join("0002_early.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let migrations = scan_dir(dir.path()).unwrap();
        let versions: Vec<_> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
        assert_eq!(migrations[0].name, "early");
        assert_eq!(migrations[0].checksum, checksum("SELECT 2;"));
    }

    #[test]
    fn scan_rejects_duplicate_versions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("0003_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("V3__b.sql"), "SELECT 2;").unwrap();

        let err = scan_dir(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 3, .. }));
    }

    #[test]
    fn scan_reports_missing_directory() {
        let dir = tempdir().unwrap();
        let err = scan_dir(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, MigrationError::Scan { .. }));
    }
}
