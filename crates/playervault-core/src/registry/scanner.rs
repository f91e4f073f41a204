//! Per-world record scanning.

use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::record::RecordDecoder;
use super::Identity;
use crate::config::RegistryOptions;
use crate::error::{Result, VaultError};

/// A discovered world and the directory its player records live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorldDirectory {
    name: String,
    path: PathBuf,
    record_dir: PathBuf,
}

impl WorldDirectory {
    pub fn new(path: impl Into<PathBuf>, record_dir_name: &str) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let record_dir = path.join(record_dir_name);
        Self {
            name,
            path,
            record_dir,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_dir(&self) -> &Path {
        &self.record_dir
    }
}

/// A record that was skipped during a scan.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning one world.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Identities decoded from the world's records.
    pub identities: HashSet<Identity>,
    /// Records that could not be read or decoded.
    pub skipped: Vec<SkippedRecord>,
}

/// Enumerates and decodes the record files of a world.
#[derive(Clone)]
pub struct WorldScanner {
    decoder: Arc<dyn RecordDecoder>,
    extension: String,
}

impl std::fmt::Debug for WorldScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldScanner")
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl WorldScanner {
    pub fn new(decoder: Arc<dyn RecordDecoder>, options: &RegistryOptions) -> Self {
        Self {
            decoder,
            extension: options.record_extension.clone(),
        }
    }

    /// Whether `path` names a record file (by extension only).
    pub fn is_record_path(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Scan a world's record directory.
    ///
    /// A missing record directory yields an empty report. Any other failure
    /// to list the directory is a [`VaultError::Scan`]. Individual records
    /// that cannot be read or decoded are skipped and listed in the report.
    pub fn scan(&self, world: &WorldDirectory) -> Result<ScanReport> {
        let dir = world.record_dir();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Record directory {:?} does not exist yet", dir);
                return Ok(ScanReport::default());
            }
            Err(e) => return Err(VaultError::scan(e, dir)),
        };

        let mut report = ScanReport::default();
        for entry in entries {
            let entry = entry.map_err(|e| VaultError::scan(e, dir))?;
            let path = entry.path();
            if !self.is_record_path(&path) {
                continue;
            }
            // Follows symlinks; a dangling link fails to read below and is counted.
            if std::fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false) {
                continue;
            }

            match self.read_record(&path) {
                Ok(id) => {
                    report.identities.insert(id);
                }
                Err(reason) => {
                    warn!("Skipping record {:?}: {}", path, reason);
                    report.skipped.push(SkippedRecord { path, reason });
                }
            }
        }

        debug!(
            "Scanned world {}: {} identities, {} skipped",
            world.name(),
            report.identities.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn read_record(&self, path: &Path) -> std::result::Result<Identity, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        self.decoder.decode(&bytes).map_err(|e| {
            VaultError::Decode {
                path: path.to_path_buf(),
                source: e,
            }
            .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::record::{encode_player_record, NbtRecordDecoder};
    use tempfile::TempDir;

    fn scanner() -> WorldScanner {
        WorldScanner::new(
            Arc::new(NbtRecordDecoder::default()),
            &RegistryOptions::default(),
        )
    }

    fn world_with_records(temp: &TempDir, valid: &[&str], malformed: usize) -> WorldDirectory {
        let world = WorldDirectory::new(temp.path().join("world"), "playerdata");
        std::fs::create_dir_all(world.record_dir()).unwrap();
        for (i, name) in valid.iter().enumerate() {
            std::fs::write(
                world.record_dir().join(format!("valid-{}.dat", i)),
                encode_player_record(name).unwrap(),
            )
            .unwrap();
        }
        for i in 0..malformed {
            std::fs::write(
                world.record_dir().join(format!("broken-{}.dat", i)),
                b"\x0a\x00\x00\x08",
            )
            .unwrap();
        }
        world
    }

    #[test]
    fn test_world_directory_paths() {
        let world = WorldDirectory::new("/srv/mc/world_nether", "playerdata");
        assert_eq!(world.name(), "world_nether");
        assert_eq!(
            world.record_dir(),
            Path::new("/srv/mc/world_nether/playerdata")
        );
    }

    #[test]
    fn test_scan_valid_and_malformed() {
        let temp = TempDir::new().unwrap();
        let world = world_with_records(&temp, &["Steve", "Alex", "Notch"], 2);

        let report = scanner().scan(&world).unwrap();
        let expected: HashSet<Identity> = ["Steve", "Alex", "Notch"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(report.identities, expected);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_scan_missing_record_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let world = WorldDirectory::new(temp.path().join("world"), "playerdata");
        let report = scanner().scan(&world).unwrap();
        assert!(report.identities.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_scan_ignores_other_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        let world = world_with_records(&temp, &["Steve"], 0);
        let dir = world.record_dir();
        std::fs::write(dir.join("old.dat_old"), encode_player_record("Ghost").unwrap())
            .unwrap();
        std::fs::write(dir.join("notes.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.join("nested.dat")).unwrap();

        let report = scanner().scan(&world).unwrap();
        assert_eq!(report.identities.len(), 1);
        assert!(report.identities.contains("Steve"));
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_scan_record_dir_is_a_file() {
        let temp = TempDir::new().unwrap();
        let world = WorldDirectory::new(temp.path().join("world"), "playerdata");
        std::fs::create_dir_all(world.path()).unwrap();
        std::fs::write(world.record_dir(), b"not a directory").unwrap();

        let result = scanner().scan(&world);
        assert!(matches!(result, Err(VaultError::Scan { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinked_records() {
        let temp = TempDir::new().unwrap();
        let world = world_with_records(&temp, &[], 0);
        let target = temp.path().join("elsewhere.dat");
        std::fs::write(&target, encode_player_record("Linked").unwrap()).unwrap();
        std::os::unix::fs::symlink(&target, world.record_dir().join("linked.dat")).unwrap();
        std::os::unix::fs::symlink(
            temp.path().join("missing.dat"),
            world.record_dir().join("dangling.dat"),
        )
        .unwrap();

        let report = scanner().scan(&world).unwrap();
        assert!(report.identities.contains("Linked"));
        assert_eq!(report.identities.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("dangling.dat"));
    }

    #[test]
    fn test_is_record_path() {
        let s = scanner();
        assert!(s.is_record_path(Path::new("/w/playerdata/abc.dat")));
        assert!(s.is_record_path(Path::new("/w/playerdata/abc.DAT")));
        assert!(!s.is_record_path(Path::new("/w/playerdata/abc.dat_old")));
        assert!(!s.is_record_path(Path::new("/w/playerdata/abc")));
    }
}
