//! Transaction shadow-copy helper (C9).
//!
//! A coarse but simple approach: copy the target file's bytes to a sibling
//! `.bak` path before the closure runs, then either discard the backup on
//! success or copy it back over the target on failure. Shared by the record
//! engine (one file) and the coordinator (record + memo files).

use std::path::{Path, PathBuf};

use crate::error::Result;

fn backup_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(".bak");
    PathBuf::from(p)
}

struct ShadowCopy {
    target: PathBuf,
    backup: PathBuf,
}

impl ShadowCopy {
    fn begin(target: &Path) -> Result<ShadowCopy> {
        let backup = backup_path(target);
        std::fs::copy(target, &backup)?;
        Ok(ShadowCopy {
            target: target.to_path_buf(),
            backup,
        })
    }

    fn commit(self) -> Result<()> {
        std::fs::remove_file(&self.backup)?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        std::fs::copy(&self.backup, &self.target)?;
        std::fs::remove_file(&self.backup)?;
        Ok(())
    }
}

/// Run `f` under a shadow-copy transaction over a single file. On `Ok`, the
/// backup is deleted and `f`'s value is returned. On `Err`, the file's
/// original bytes are restored before the error propagates.
pub fn with_transaction<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let shadow = ShadowCopy::begin(path)?;
    match f() {
        Ok(value) => {
            shadow.commit()?;
            Ok(value)
        }
        Err(err) => {
            shadow.rollback()?;
            Err(crate::error::Error::TransactionRolledBack(Box::new(err)))
        }
    }
}

/// Same as [`with_transaction`], extended across two files (record + memo).
pub fn with_transaction2<T>(
    a: &Path,
    b: &Path,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let shadow_a = ShadowCopy::begin(a)?;
    let shadow_b = ShadowCopy::begin(b)?;
    match f() {
        Ok(value) => {
            shadow_a.commit()?;
            shadow_b.commit()?;
            Ok(value)
        }
        Err(err) => {
            shadow_a.rollback()?;
            shadow_b.rollback()?;
            Err(crate::error::Error::TransactionRolledBack(Box::new(err)))
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::error::Error;

    #[test]
    fn test_commit_leaves_changes_and_no_backup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path().to_path_buf();

        with_transaction(&path, || {
            std::fs::write(&path, b"world").unwrap();
            Ok(())
        })
        .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"world");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_rollback_restores_original_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path().to_path_buf();

        let result: Result<()> = with_transaction(&path, || {
            std::fs::write(&path, b"world").unwrap();
            Err(Error::NotWritable)
        });

        assert!(matches!(result, Err(Error::TransactionRolledBack(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!backup_path(&path).exists());
    }
}
