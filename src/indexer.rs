//! Indexer: scan → diff → parse → store pipeline for one source.
//!
//! Failures are contained per file: an unreadable or unparseable transcript
//! keeps whatever the index held for it, and a failed session write rolls
//! back alone. Only a fatal store error aborts the pass.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{IndexError, ParseError, ScanError, StoreError};
use crate::probe::{ProbeRegistry, SourceFormat, TranscriptProbe};
use crate::scan::{self, DiscoveredFile};
use crate::store::{self, IndexStore, SessionRecord};

// ============================================================================
// Types
// ============================================================================

/// Outcome of indexing one source
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub source: SourceFormat,
    /// Files indexed for the first time
    pub added: usize,
    /// Files re-parsed after a change
    pub updated: usize,
    /// Files with a new signature but identical content
    pub touched: usize,
    pub unchanged: usize,
    /// Sessions pruned because their file disappeared
    pub removed: usize,
    /// Files skipped because they hold no records
    pub empty: usize,
    /// Files that could not be read, parsed or stored
    pub failed: usize,
    /// Files left alone because they already failed to parse or were
    /// empty at their current signature
    pub skipped: usize,
    pub malformed_lines: usize,
    pub ignored_records: usize,
    /// The source directory does not exist
    pub base_missing: bool,
}

impl ScanReport {
    fn new(source: SourceFormat) -> Self {
        Self {
            source,
            added: 0,
            updated: 0,
            touched: 0,
            unchanged: 0,
            removed: 0,
            empty: 0,
            failed: 0,
            skipped: 0,
            malformed_lines: 0,
            ignored_records: 0,
            base_missing: false,
        }
    }
}

/// Outcome of indexing every enabled source
#[derive(Debug, Clone, Serialize)]
pub struct RescanReport {
    pub sources: Vec<ScanReport>,
    pub duration_ms: u64,
}

enum FileOutcome {
    Added,
    Updated,
    Touched,
    Empty,
}

#[derive(Debug, Error)]
enum FileError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// index
// ============================================================================

/// Index every probe in the registry, in order
pub fn index_all(store: &Mutex<IndexStore>, registry: &ProbeRegistry) -> Result<RescanReport, IndexError> {
    let started = Instant::now();
    let mut sources = vec![];
    for probe in registry.all_probes() {
        sources.push(index_source(store, probe)?);
    }
    Ok(RescanReport {
        sources,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Bring the index up to date with one source's directory.
///
/// The store lock is taken per operation, never across file reads or
/// parsing, so readers are only blocked for single-session writes.
pub fn index_source(store: &Mutex<IndexStore>, probe: &dyn TranscriptProbe) -> Result<ScanReport, IndexError> {
    let format = probe.format();
    let mut report = ScanReport::new(format);

    let indexed = store::lock(store).file_signatures(format)?;
    let plan = scan::plan(probe, &indexed);
    report.unchanged = plan.unchanged;
    report.base_missing = plan.base_missing;

    for err in &plan.errors {
        warn!(source = %format, error = %err, "cannot read transcript entry");
        report.failed += 1;
    }

    // Session ids held by files that are still on disk
    let mut owners: HashMap<String, String> = indexed
        .values()
        .filter(|f| plan.present.contains(&f.file_path))
        .map(|f| (f.session_id.clone(), f.file_path.clone()))
        .collect();

    for file in &plan.changed {
        let path_str = file.path_str();
        if store::lock(store).is_unindexable(format, &path_str, file.signature) {
            report.skipped += 1;
            continue;
        }

        match index_file(store, probe, file, &mut owners, &mut report) {
            Ok(FileOutcome::Added) => report.added += 1,
            Ok(FileOutcome::Updated) => report.updated += 1,
            Ok(FileOutcome::Touched) => report.touched += 1,
            Ok(FileOutcome::Empty) => {
                debug!(source = %format, path = %path_str, "skipping empty transcript");
                store::lock(store).mark_unindexable(format, &path_str, file.signature);
                report.empty += 1;
            }
            Err(FileError::Store(e)) if e.is_fatal() => return Err(IndexError::Store(e)),
            Err(e) => {
                warn!(source = %format, path = %path_str, error = %e, "skipping transcript");
                // Unreadable files and store failures may be transient
                if matches!(e, FileError::Parse(_)) {
                    store::lock(store).mark_unindexable(format, &path_str, file.signature);
                }
                report.failed += 1;
            }
        }
    }
    if !plan.base_missing {
        store::lock(store).retain_unindexable(format, &plan.present);
    }

    for file in &plan.missing {
        match store::lock(store).remove_file(&file.file_path) {
            Ok(true) => report.removed += 1,
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(IndexError::Store(e)),
            Err(e) => {
                warn!(source = %format, path = %file.file_path, error = %e, "cannot prune session");
                report.failed += 1;
            }
        }
    }

    info!(
        source = %format,
        added = report.added,
        updated = report.updated,
        touched = report.touched,
        removed = report.removed,
        unchanged = report.unchanged,
        failed = report.failed,
        skipped = report.skipped,
        malformed_lines = report.malformed_lines,
        "indexed source"
    );

    Ok(report)
}

fn index_file(
    store: &Mutex<IndexStore>,
    probe: &dyn TranscriptProbe,
    file: &DiscoveredFile,
    owners: &mut HashMap<String, String>,
    report: &mut ScanReport,
) -> Result<FileOutcome, FileError> {
    let path_str = file.path_str();
    let bytes = std::fs::read(&file.path).map_err(|source| ScanError::Io {
        path: file.path.clone(),
        source,
    })?;
    let content_hash = hex::encode(Sha256::digest(&bytes));

    // Same bytes, same parser: only the signature moved
    if let Some(prev) = &file.previous {
        if prev.content_hash == content_hash && prev.parser_version == probe.parser_version() {
            store::lock(store).touch_file(&path_str, file.signature)?;
            return Ok(FileOutcome::Touched);
        }
    }

    let stem = file.file_stem();
    let parsed = match probe.parse(&stem, &bytes) {
        Ok(parsed) => parsed,
        Err(ParseError::Empty) => return Ok(FileOutcome::Empty),
        Err(e) => return Err(e.into()),
    };
    report.malformed_lines += parsed.stats.malformed_lines;
    report.ignored_records += parsed.stats.ignored_records;

    let format = probe.format();
    let mut id = format!("{}:{}", format, parsed.summary.external_id);
    if owners.get(&id).is_some_and(|owner| *owner != path_str) {
        id = format!("{id}#{stem}");
    }

    let record = SessionRecord {
        id: id.clone(),
        source: format,
        external_id: parsed.summary.external_id.clone(),
        cwd: parsed.summary.cwd.clone(),
        title: parsed.summary.title.clone(),
        started_at_ms: parsed.summary.started_at_ms,
        last_activity_ms: parsed.summary.last_activity_ms,
        message_count: parsed.summary.message_count as i64,
        file_path: path_str.clone(),
        signature: file.signature,
        content_hash,
        parser_version: probe.parser_version(),
        search_text: parsed.search_text(),
    };

    {
        let mut guard = store::lock(store);
        guard.replace_session(&record, &parsed.messages)?;
        guard.forget_unindexable(format, &path_str);
    }

    if let Some(prev) = &file.previous {
        if prev.session_id != id {
            owners.remove(&prev.session_id);
        }
    }
    owners.insert(id, path_str);

    Ok(if file.previous.is_some() {
        FileOutcome::Updated
    } else {
        FileOutcome::Added
    })
}
