//! Background import job.
//!
//! Parsing, enrichment, persistence and the optional export run on a dedicated
//! thread. The caller watches progress through the job's event stream and can
//! request cancellation at any time.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::{run_batch, BatchOptions, BatchReport, BatchStatus, CancelFlag};
use crate::enrich::Enricher;
use crate::plist::{parse_library_file, write_library, ParseOptions};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::SqliteTrackStore;

#[derive(Clone, Debug)]
pub struct ImportRequest {
    pub library: PathBuf,
    pub db_path: PathBuf,
    pub parse: ParseOptions,
    pub batch: BatchOptions,
    /// Write the enriched library here once the batch succeeds
    pub export: Option<PathBuf>,
}

pub struct ImportJob {
    events: Receiver<ProgressEvent>,
    cancel: CancelFlag,
    handle: JoinHandle<Result<BatchReport>>,
}

impl ImportJob {
    pub fn spawn(request: ImportRequest, enricher: Arc<Enricher>) -> Result<Self> {
        let (tx, events) = unbounded();
        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("import-job".into())
            .spawn(move || {
                let result = run_import(&request, &enricher, &tx, &job_cancel);
                // Exactly one terminal event, after the export step
                let finished = match &result {
                    Ok(report) => report.finished_event(),
                    // Batch never started, nothing was written
                    Err(e) => ProgressEvent::Finished {
                        status: BatchStatus::Failed {
                            reason: format!("{:#}", e),
                        },
                        persisted: 0,
                    },
                };
                tx.report(&finished);
                result
            })
            .context("Failed to spawn import job")?;

        Ok(Self {
            events,
            cancel,
            handle,
        })
    }

    /// Status stream: `Progress` events, then a single `Finished` event.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the job ends.
    pub fn wait(self) -> Result<BatchReport> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("Import job panicked"))?
    }
}

fn run_import(
    request: &ImportRequest,
    enricher: &Enricher,
    tx: &Sender<ProgressEvent>,
    cancel: &CancelFlag,
) -> Result<BatchReport> {
    info!("Reading library: {:?}", request.library);
    let parsed = parse_library_file(&request.library, &request.parse)?;

    let mut store = SqliteTrackStore::open(&request.db_path)
        .with_context(|| format!("Failed to open database {}", request.db_path.display()))?;

    let parsed_records = parsed.records.len();
    let mut report = run_batch(parsed.records, enricher, &mut store, tx, cancel, &request.batch)?;
    report.stats.parsed_records = parsed_records;
    report.stats.parse_failures = parsed.failures;
    report.stats.parse_warnings = parsed.warnings.len();

    if let Some(export) = &request.export {
        if report.status.is_success() {
            match write_library(&report.records, export) {
                Ok(()) => info!("Wrote enriched library: {:?}", export),
                Err(e) => {
                    // Rows stay committed; only the outcome changes
                    let reason = format!("Failed to write library {}: {}", export.display(), e);
                    error!("{}", reason);
                    report.status = BatchStatus::Failed { reason };
                }
            }
        } else {
            warn!(status = report.status.as_str(), "Batch did not complete; skipping export");
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSearch;
    use crate::enrich::tests::hey_jude_catalog;
    use crate::enrich::EnricherConfig;
    use crate::store::TrackStore;

    const LIBRARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>Tracks</key>
    <dict>
        <key>1</key><dict><key>Track ID</key><integer>1</integer><key>Name</key><string>Hey Jude</string><key>Artist</key><string>The Beatles</string></dict>
        <key>2</key><dict><key>Track ID</key><integer>2</integer><key>Name</key><string>Dated</string><key>Artist</key><string>Someone</string><key>Year</key><integer>1999</integer></dict>
    </dict>
</dict>
</plist>"#;

    fn enricher() -> Arc<Enricher> {
        Arc::new(Enricher::new(
            Some(Arc::new(hey_jude_catalog()) as Arc<dyn CatalogSearch>),
            EnricherConfig::default(),
        ))
    }

    #[test]
    fn test_job_streams_progress_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("Library.xml");
        std::fs::write(&library, LIBRARY).unwrap();
        let export = dir.path().join("out/enriched.xml");

        let job = ImportJob::spawn(
            ImportRequest {
                library,
                db_path: dir.path().join("tracks.sqlite3"),
                parse: ParseOptions::default(),
                batch: BatchOptions::default(),
                export: Some(export.clone()),
            },
            enricher(),
        )
        .unwrap();

        let events: Vec<ProgressEvent> = job.events().iter().collect();
        let report = job.wait().unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], ProgressEvent::Progress { percent: 100, .. }));
        assert!(matches!(
            events[2],
            ProgressEvent::Finished {
                status: BatchStatus::Completed,
                persisted: 2
            }
        ));
        assert_eq!(report.stats.parsed_records, 2);
        assert_eq!(report.stats.matched, 1);
        assert_eq!(report.stats.already_dated, 1);
        assert!(std::fs::read_to_string(export).unwrap().contains("<key>Year</key><integer>1968</integer>"));
    }

    #[test]
    fn test_unreadable_library_fails_with_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let job = ImportJob::spawn(
            ImportRequest {
                library: dir.path().join("missing.xml"),
                db_path: dir.path().join("tracks.sqlite3"),
                parse: ParseOptions::default(),
                batch: BatchOptions::default(),
                export: None,
            },
            enricher(),
        )
        .unwrap();

        let events: Vec<ProgressEvent> = job.events().iter().collect();
        assert!(job.wait().is_err());
        assert!(matches!(
            events.as_slice(),
            [ProgressEvent::Finished {
                status: BatchStatus::Failed { .. },
                ..
            }]
        ));
    }

    #[test]
    fn test_failed_export_reports_single_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("Library.xml");
        std::fs::write(&library, LIBRARY).unwrap();
        // A regular file where the export directory should be
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, "").unwrap();
        let db_path = dir.path().join("tracks.sqlite3");

        let job = ImportJob::spawn(
            ImportRequest {
                library,
                db_path: db_path.clone(),
                parse: ParseOptions::default(),
                batch: BatchOptions::default(),
                export: Some(blocker.join("enriched.xml")),
            },
            enricher(),
        )
        .unwrap();

        let events: Vec<ProgressEvent> = job.events().iter().collect();
        let report = job.wait().unwrap();

        let finished: Vec<&ProgressEvent> = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Finished {
                status: BatchStatus::Failed { .. },
                persisted: 2
            })
        ));
        assert!(matches!(report.status, BatchStatus::Failed { .. }));
        assert_eq!(report.stats.persisted, 2);

        let store = SqliteTrackStore::open(&db_path).unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }
}
