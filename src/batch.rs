//! Batch enrichment and persistence.
//!
//! Records are enriched on a bounded rayon pool. Workers hand finished records
//! to the calling thread over a bounded channel; that thread is the only writer
//! to the store and the only progress emitter, so progress never goes backwards.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::enrich::Enricher;
use crate::models::{BatchStats, EnrichOutcome, PersistedTrack, TrackRecord};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::TrackStore;

/// Shared stop request, checked before each record.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Enrichment threads, 0 = one per core
    pub workers: usize,
    /// Look up missing years; off persists records as parsed
    pub enrich: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            enrich: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BatchStatus {
    Completed,
    /// Every record attempted, some ended without a year
    CompletedWithDegraded { degraded: usize },
    /// Stopped early; rows already written stay written
    Cancelled,
    Failed { reason: String },
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "completed",
            BatchStatus::CompletedWithDegraded { .. } => "completed_with_degraded",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::CompletedWithDegraded { .. }
        )
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub stats: BatchStats,
    /// Attempted records in document order, enriched where applicable
    pub records: Vec<TrackRecord>,
}

impl BatchReport {
    /// Terminal status event for this report.
    pub fn finished_event(&self) -> ProgressEvent {
        ProgressEvent::Finished {
            status: self.status.clone(),
            persisted: self.stats.persisted,
        }
    }
}

struct Processed {
    index: usize,
    record: TrackRecord,
    outcome: Option<EnrichOutcome>,
}

/// Enrich and persist `records`, reporting progress to `sink`.
///
/// Only `Progress` events are emitted here; the terminal `Finished` event is
/// left to the caller, which may still have work to do after the batch.
/// A store failure stops the batch with `BatchStatus::Failed`; a cancel request
/// stops it with `BatchStatus::Cancelled`. Neither rolls back committed rows.
pub fn run_batch(
    records: Vec<TrackRecord>,
    enricher: &Enricher,
    store: &mut dyn TrackStore,
    sink: &dyn ProgressSink,
    cancel: &CancelFlag,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let start = Instant::now();
    let total = records.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()
        .context("Failed to build enrichment thread pool")?;
    let (tx, rx) = bounded::<Processed>(pool.current_num_threads() * 2);

    info!(
        total,
        workers = pool.current_num_threads(),
        enrich = options.enrich,
        "Starting batch"
    );

    let mut stats = BatchStats::default();
    let mut slots: Vec<Option<TrackRecord>> = vec![None; total];
    let mut failure: Option<String> = None;
    let mut processed = 0usize;

    std::thread::scope(|scope| {
        let pool = &pool;
        scope.spawn(move || {
            pool.install(|| {
                records
                    .into_par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (index, mut record)| {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let outcome = options.enrich.then(|| enricher.enrich(&mut record));
                        // Writer keeps draining until every sender is gone
                        let _ = tx.send(Processed {
                            index,
                            record,
                            outcome,
                        });
                    });
            });
        });

        for Processed {
            index,
            record,
            outcome,
        } in rx.iter()
        {
            if let Some(outcome) = outcome {
                stats.record(outcome);
            }

            if failure.is_none() {
                match store.upsert(&PersistedTrack::from(&record)) {
                    Ok(()) => stats.persisted += 1,
                    Err(e) => {
                        error!(record = %record.key(), "Failed persisting track: {}", e);
                        failure = Some(e.to_string());
                        cancel.cancel();
                    }
                }
            }

            processed += 1;
            sink.report(&ProgressEvent::progress(processed, total));
            slots[index] = Some(record);
        }
    });

    if total == 0 {
        sink.report(&ProgressEvent::progress(0, 0));
    }

    stats.skipped_cancelled = total - processed;
    stats.elapsed_seconds = start.elapsed().as_secs_f64();

    let status = match failure {
        Some(reason) => BatchStatus::Failed { reason },
        None if processed < total => BatchStatus::Cancelled,
        None if stats.degraded() > 0 => BatchStatus::CompletedWithDegraded {
            degraded: stats.degraded(),
        },
        None => BatchStatus::Completed,
    };

    info!(
        status = status.as_str(),
        processed,
        persisted = stats.persisted,
        matched = stats.matched,
        degraded = stats.degraded(),
        "Batch finished"
    );

    Ok(BatchReport {
        status,
        stats,
        records: slots.into_iter().flatten().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSearch;
    use crate::enrich::tests::{hey_jude_catalog, ScriptedCatalog};
    use crate::enrich::EnricherConfig;
    use crate::error::PersistenceError;
    use crate::models::{FieldValue, UNKNOWN};
    use crate::store::SqliteTrackStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn report(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn percents(&self) -> Vec<u8> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect()
        }

        fn last(&self) -> Option<ProgressEvent> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    /// Fails every write after the first `ok` ones.
    struct FlakyStore {
        ok: usize,
        writes: usize,
    }

    impl TrackStore for FlakyStore {
        fn upsert(&mut self, _track: &PersistedTrack) -> Result<(), PersistenceError> {
            self.writes += 1;
            if self.writes > self.ok {
                return Err(PersistenceError::NotFound("disk full".into()));
            }
            Ok(())
        }

        fn get(&self, _key: &str) -> Result<Option<PersistedTrack>, PersistenceError> {
            Ok(None)
        }

        fn all(&self) -> Result<Vec<PersistedTrack>, PersistenceError> {
            Ok(Vec::new())
        }

        fn delete_all(&mut self) -> Result<usize, PersistenceError> {
            Ok(0)
        }
    }

    fn record(id: i64, name: &str, artist: &str) -> TrackRecord {
        let mut record = TrackRecord::new(id as usize);
        record.track_id = Some(id);
        record.name = Some(name.to_string());
        record.artist = Some(artist.to_string());
        record
    }

    fn enricher(catalog: ScriptedCatalog) -> Enricher {
        Enricher::new(
            Some(Arc::new(catalog) as Arc<dyn CatalogSearch>),
            EnricherConfig::default(),
        )
    }

    #[test]
    fn test_progress_monotonic_and_reaches_100_once() {
        let records: Vec<TrackRecord> = (1..=25).map(|i| record(i, "Hey Jude", "The Beatles")).collect();
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let sink = Recorder::default();
        let options = BatchOptions {
            workers: 4,
            enrich: true,
        };

        let report = run_batch(
            records,
            &enricher(hey_jude_catalog()),
            &mut store,
            &sink,
            &CancelFlag::new(),
            &options,
        )
        .unwrap();

        let percents = sink.percents();
        assert_eq!(percents.len(), 25);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(percents.last(), Some(&100));

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.stats.matched, 25);
        assert_eq!(report.stats.persisted, 25);
        assert_eq!(store.all().unwrap().len(), 25);
        assert!(matches!(sink.last(), Some(ProgressEvent::Progress { percent: 100, .. })));
        assert_eq!(
            report.finished_event(),
            ProgressEvent::Finished {
                status: BatchStatus::Completed,
                persisted: 25
            }
        );
    }

    #[test]
    fn test_records_returned_in_document_order() {
        let records: Vec<TrackRecord> = (1..=10).map(|i| record(i, "Song", "Nobody")).collect();
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let report = run_batch(
            records,
            &enricher(ScriptedCatalog::default()),
            &mut store,
            &Recorder::default(),
            &CancelFlag::new(),
            &BatchOptions::default(),
        )
        .unwrap();

        let ids: Vec<i64> = report.records.iter().filter_map(|r| r.track_id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(report.status, BatchStatus::CompletedWithDegraded { degraded: 10 });
        assert!(report
            .records
            .iter()
            .all(|r| r.year == Some(FieldValue::Text(UNKNOWN.into()))));
    }

    #[test]
    fn test_empty_batch_reports_100_once() {
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let sink = Recorder::default();
        let report = run_batch(
            Vec::new(),
            &enricher(ScriptedCatalog::default()),
            &mut store,
            &sink,
            &CancelFlag::new(),
            &BatchOptions::default(),
        )
        .unwrap();
        assert_eq!(sink.percents(), vec![100]);
        assert_eq!(report.status, BatchStatus::Completed);
    }

    #[test]
    fn test_cancelled_before_start() {
        let records: Vec<TrackRecord> = (1..=5).map(|i| record(i, "Hey Jude", "The Beatles")).collect();
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = run_batch(
            records,
            &enricher(hey_jude_catalog()),
            &mut store,
            &Recorder::default(),
            &cancel,
            &BatchOptions::default(),
        )
        .unwrap();
        assert_eq!(report.status, BatchStatus::Cancelled);
        assert_eq!(report.stats.skipped_cancelled, 5);
        assert!(store.all().unwrap().is_empty());
    }

    /// Requests cancellation once `after` records have been reported.
    struct CancelAfter {
        cancel: CancelFlag,
        after: usize,
        events: Recorder,
    }

    impl ProgressSink for CancelAfter {
        fn report(&self, event: &ProgressEvent) {
            self.events.report(event);
            if let ProgressEvent::Progress { processed, .. } = event {
                if *processed == self.after {
                    self.cancel.cancel();
                }
            }
        }
    }

    #[test]
    fn test_cancel_mid_batch_keeps_committed_rows() {
        let total = 50;
        let records: Vec<TrackRecord> = (1..=total as i64).map(|i| record(i, "Hey Jude", "The Beatles")).collect();
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let cancel = CancelFlag::new();
        let sink = CancelAfter {
            cancel: cancel.clone(),
            after: 3,
            events: Recorder::default(),
        };

        let report = run_batch(
            records,
            &enricher(hey_jude_catalog()),
            &mut store,
            &sink,
            &cancel,
            &BatchOptions {
                workers: 1,
                enrich: true,
            },
        )
        .unwrap();

        let percents = sink.events.percents();
        let processed = percents.len();
        assert_eq!(report.status, BatchStatus::Cancelled);
        assert!(processed >= 3 && processed < total);
        assert!(!percents.contains(&100));
        assert_eq!(report.stats.skipped_cancelled, total - processed);
        assert_eq!(report.stats.persisted, processed);
        assert_eq!(report.records.len(), processed);

        let stored = store.all().unwrap();
        assert_eq!(stored.len(), processed);
        let mut stored_keys: Vec<String> = stored.iter().map(|t| t.record_key.clone()).collect();
        let mut attempted_keys: Vec<String> = report.records.iter().map(|r| r.key()).collect();
        stored_keys.sort();
        attempted_keys.sort();
        assert_eq!(stored_keys, attempted_keys);
    }

    #[test]
    fn test_store_failure_fails_batch() {
        let records: Vec<TrackRecord> = (1..=5).map(|i| record(i, "Song", "Nobody")).collect();
        let mut store = FlakyStore { ok: 2, writes: 0 };
        let report = run_batch(
            records,
            &enricher(ScriptedCatalog::default()),
            &mut store,
            &Recorder::default(),
            &CancelFlag::new(),
            &BatchOptions {
                workers: 1,
                enrich: false,
            },
        )
        .unwrap();
        assert!(matches!(report.status, BatchStatus::Failed { .. }));
        assert_eq!(report.stats.persisted, 2);
        assert_eq!(store.writes, 3);
    }

    #[test]
    fn test_no_enrich_persists_as_parsed() {
        let mut rec = record(1, "Hey Jude", "The Beatles");
        rec.genre = None;
        let mut store = SqliteTrackStore::open_in_memory().unwrap();
        let report = run_batch(
            vec![rec],
            &enricher(hey_jude_catalog()),
            &mut store,
            &Recorder::default(),
            &CancelFlag::new(),
            &BatchOptions {
                workers: 1,
                enrich: false,
            },
        )
        .unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        let row = store.get("1").unwrap().unwrap();
        assert_eq!(row.year, None);
        assert_eq!(row.genre, None);
    }
}
