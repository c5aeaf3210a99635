//! Session scanner: discover transcript files and diff them against the index.
//!
//! A file needs parsing when it was never indexed, its `(mtime, size)`
//! signature changed, or it was indexed by an older parser version.
//! Rewrites that keep both mtime and size are not detected.

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::probe::TranscriptProbe;
use crate::store::{FileSignature, IndexedFile};

// ============================================================================
// Types
// ============================================================================

/// A transcript file found on disk that needs (re)parsing
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub signature: FileSignature,
    /// What the index held for this path, if anything
    pub previous: Option<IndexedFile>,
}

impl DiscoveredFile {
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of diffing one source's directory against the index
#[derive(Debug, Default)]
pub struct ScanPlan {
    /// New or modified files, in path order
    pub changed: Vec<DiscoveredFile>,
    /// Count of files whose signature and parser version match
    pub unchanged: usize,
    /// Indexed files no longer on disk
    pub missing: Vec<IndexedFile>,
    /// Every accepted path seen by the walk
    pub present: HashSet<String>,
    /// Entries that could not be read; the walk continued past them
    pub errors: Vec<ScanError>,
    /// The base directory does not exist; nothing is pruned
    pub base_missing: bool,
}

// ============================================================================
// plan
// ============================================================================

/// Walk `probe.base_path()` and classify every accepted file.
///
/// Indexed files under a directory that failed to read are neither
/// reported missing nor pruned.
pub fn plan(probe: &dyn TranscriptProbe, indexed: &HashMap<String, IndexedFile>) -> ScanPlan {
    let base = probe.base_path();
    let mut plan = ScanPlan::default();

    if !base.is_dir() {
        debug!(source = %probe.format(), path = %base.display(), "base directory missing");
        plan.base_missing = true;
        return plan;
    }

    let parser_version = probe.parser_version();
    let mut unreadable: Vec<PathBuf> = vec![];

    for entry in WalkDir::new(base).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(path) = e.path() {
                    unreadable.push(path.to_path_buf());
                }
                plan.errors.push(ScanError::from(e));
                continue;
            }
        };

        if !entry.file_type().is_file() || !probe.accepts(entry.path()) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let signature = match entry
            .metadata()
            .map_err(ScanError::from)
            .and_then(|meta| signature_of(&path, &meta))
        {
            Ok(signature) => signature,
            Err(e) => {
                unreadable.push(path);
                plan.errors.push(e);
                continue;
            }
        };

        let key = path.to_string_lossy().into_owned();
        plan.present.insert(key.clone());

        let previous = indexed.get(&key);
        let is_current = previous
            .map(|p| p.signature == signature && p.parser_version == parser_version)
            .unwrap_or(false);
        if is_current {
            plan.unchanged += 1;
        } else {
            plan.changed.push(DiscoveredFile {
                path,
                signature,
                previous: previous.cloned(),
            });
        }
    }

    let mut missing: Vec<IndexedFile> = indexed
        .values()
        .filter(|file| !plan.present.contains(&file.file_path))
        .filter(|file| {
            let path = Path::new(&file.file_path);
            !unreadable.iter().any(|dir| path.starts_with(dir))
        })
        .cloned()
        .collect();
    missing.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    plan.missing = missing;

    plan
}

/// Signature of a file from its metadata
pub fn signature_of(path: &Path, meta: &Metadata) -> Result<FileSignature, ScanError> {
    let modified = meta.modified().map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime_ms = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ScanError::Time {
            path: path.to_path_buf(),
        })?
        .as_millis() as i64;
    Ok(FileSignature {
        mtime_ms,
        size: meta.len() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ClaudeCodeProbe, CodexProbe};
    use std::fs;

    fn indexed(path: &Path, signature: FileSignature, parser_version: i64) -> IndexedFile {
        IndexedFile {
            session_id: "codex:x".to_string(),
            file_path: path.to_string_lossy().into_owned(),
            signature,
            content_hash: String::new(),
            parser_version,
        }
    }

    fn current_signature(path: &Path) -> FileSignature {
        signature_of(path, &fs::metadata(path).unwrap()).unwrap()
    }

    #[test]
    fn test_new_files_are_changed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2025/03/01")).unwrap();
        fs::write(dir.path().join("2025/03/01/rollout-b.jsonl"), "{}\n").unwrap();
        fs::write(dir.path().join("2025/03/01/rollout-a.jsonl"), "{}\n").unwrap();
        fs::write(dir.path().join("2025/03/01/notes.txt"), "x").unwrap();

        let probe = CodexProbe::new(Some(dir.path().to_path_buf()), None);
        let plan = plan(&probe, &HashMap::new());

        let names: Vec<String> = plan.changed.iter().map(|f| f.file_stem()).collect();
        assert_eq!(names, vec!["rollout-a", "rollout-b"]);
        assert!(plan.changed.iter().all(|f| f.previous.is_none()));
        assert_eq!(plan.present.len(), 2);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_unchanged_and_version_bump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "{}\n").unwrap();
        let probe = CodexProbe::new(Some(dir.path().to_path_buf()), None);
        let sig = current_signature(&path);

        let mut known = HashMap::new();
        let file = indexed(&path, sig, probe.parser_version());
        known.insert(file.file_path.clone(), file);
        let plan_same = plan(&probe, &known);
        assert_eq!(plan_same.unchanged, 1);
        assert!(plan_same.changed.is_empty());

        let old_version = indexed(&path, sig, probe.parser_version() - 1);
        known.insert(old_version.file_path.clone(), old_version);
        let plan_bumped = plan(&probe, &known);
        assert_eq!(plan_bumped.changed.len(), 1);
        assert!(plan_bumped.changed[0].previous.is_some());

        let resized = indexed(
            &path,
            FileSignature {
                mtime_ms: sig.mtime_ms,
                size: sig.size + 1,
            },
            probe.parser_version(),
        );
        known.insert(resized.file_path.clone(), resized);
        assert_eq!(plan(&probe, &known).changed.len(), 1);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.jsonl");
        let probe = CodexProbe::new(Some(dir.path().to_path_buf()), None);

        let mut known = HashMap::new();
        let file = indexed(&gone, FileSignature { mtime_ms: 1, size: 1 }, 1);
        known.insert(file.file_path.clone(), file);

        let plan = plan(&probe, &known);
        assert_eq!(plan.missing.len(), 1);
        assert!(!plan.base_missing);
    }

    #[test]
    fn test_missing_base_directory_prunes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("not-mounted");
        let probe = CodexProbe::new(Some(base.clone()), None);

        let mut known = HashMap::new();
        let file = indexed(&base.join("a.jsonl"), FileSignature { mtime_ms: 1, size: 1 }, 1);
        known.insert(file.file_path.clone(), file);

        let plan = plan(&probe, &known);
        assert!(plan.base_missing);
        assert!(plan.missing.is_empty());
        assert!(plan.changed.is_empty());
    }

    #[test]
    fn test_exclusion_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("-home-dev-app")).unwrap();
        fs::write(dir.path().join("-home-dev-app/abc.jsonl"), "{}\n").unwrap();
        fs::write(dir.path().join("-home-dev-app/agent-1.jsonl"), "{}\n").unwrap();

        let probe = ClaudeCodeProbe::new(Some(dir.path().to_path_buf()), None);
        let plan = plan(&probe, &HashMap::new());
        assert_eq!(plan.changed.len(), 1);
        assert_eq!(plan.changed[0].file_stem(), "abc");
    }
}
