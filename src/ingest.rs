// logsift - GPL-3.0-or-later
// This file is part of logsift.
//
// logsift is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// logsift is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with logsift.  If not, see <https://www.gnu.org/licenses/>.

//! Drives parsing and classification for whole files or tailed increments.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AnalyzerError;
use crate::parser::entry::LogEntry;
use crate::parser::framework::{self, TailParser};
use crate::pattern::classify::PatternClassifier;
use crate::store::EntryStore;

/// Tally of one ingestion pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub files: usize,
    pub parsed: usize,
    /// Entries actually stored; the rest were `(hash, logged_at)` duplicates.
    pub inserted: usize,
    pub patterns_created: usize,
    pub patterns_matched: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.files += other.files;
        self.parsed += other.parsed;
        self.inserted += other.inserted;
        self.patterns_created += other.patterns_created;
        self.patterns_matched += other.patterns_matched;
    }
}

/// Feeds parsed entries through store-side deduplication into the
/// clustering engine.
///
/// Re-running an ingestion is harmless: duplicate entries are dropped by the
/// idempotent insert and never reach `classify`, so occurrence counts stay
/// accurate under at-least-once execution.
pub struct Ingestor {
    entries: Arc<dyn EntryStore>,
    classifier: PatternClassifier,
}

impl Ingestor {
    pub fn new(entries: Arc<dyn EntryStore>, classifier: PatternClassifier) -> Self {
        Ingestor {
            entries,
            classifier,
        }
    }

    /// Parse and ingest one log file in full.
    pub fn ingest_file(
        &self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, AnalyzerError> {
        let parsed = framework::parse_file(path, now)?;
        let mut report = self.ingest_entries(&parsed, now)?;
        report.files = 1;
        info!(
            file = %path.display(),
            parsed = report.parsed,
            inserted = report.inserted,
            "ingested log file"
        );
        Ok(report)
    }

    /// Ingest every log file found under the given paths. A path that
    /// disappears mid-run is skipped with a warning; other errors abort.
    pub fn ingest_paths(
        &self,
        paths: &[std::path::PathBuf],
        now: DateTime<Utc>,
    ) -> Result<IngestReport, AnalyzerError> {
        let mut report = IngestReport::default();
        for file in framework::discover_log_files(paths) {
            match self.ingest_file(&file, now) {
                Ok(partial) => report.absorb(partial),
                Err(AnalyzerError::NotFound(path)) => {
                    warn!(file = %path.display(), "log file vanished before ingestion");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    /// Ingest whatever a tailed file appended since its last poll.
    pub fn ingest_tail(
        &self,
        tail: &mut TailParser,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, AnalyzerError> {
        let appended = tail.poll(now)?;
        self.ingest_entries(&appended, now)
    }

    /// Deduplicate, store and classify a batch of parsed entries.
    pub fn ingest_entries(
        &self,
        entries: &[LogEntry],
        now: DateTime<Utc>,
    ) -> Result<IngestReport, AnalyzerError> {
        let mut report = IngestReport {
            parsed: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            if !self.entries.insert(entry)? {
                continue;
            }
            report.inserted += 1;

            let classified = self.classifier.classify(entry, now)?;
            if classified.created {
                report.patterns_created += 1;
            } else {
                report.patterns_matched += 1;
            }
        }

        Ok(report)
    }
}
