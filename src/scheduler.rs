//! Interval-driven reconciliation.
//!
//! A [`Reconciler`] owns the drain-and-apply pass and its overlap gate; a
//! [`Scheduler`] thread calls it on a fixed period until stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use crate::{apply_record, ApplyOutcome, Mirror, PendingChangeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub records: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Idle,
    /// Another pass was still running; the tick was dropped.
    Busy,
    Completed(PassReport),
}

pub struct Reconciler {
    changes: Arc<PendingChangeSet>,
    mirror: Arc<Mirror>,
    in_progress: AtomicBool,
}

/// Clears the in-progress flag even if a pass panics.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(changes: Arc<PendingChangeSet>, mirror: Arc<Mirror>) -> Self {
        Self {
            changes,
            mirror,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass if there is work and no pass is running.
    ///
    /// The batch is every record pending when the pass starts, applied in
    /// arrival order. Records arriving meanwhile wait for a later tick.
    pub fn tick(&self) -> TickOutcome {
        if self.changes.is_empty() {
            return TickOutcome::Idle;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Reconciliation still running, skipping tick");
            return TickOutcome::Busy;
        }
        let _guard = PassGuard(&self.in_progress);

        let batch = self.changes.drain();
        if batch.is_empty() {
            return TickOutcome::Idle;
        }

        let started = Instant::now();
        let mut report = PassReport {
            records: batch.len(),
            ..PassReport::default()
        };

        for record in &batch {
            match apply_record(&self.mirror, record) {
                ApplyOutcome::Applied(action) => {
                    report.applied += 1;
                    tracing::debug!("{} {}: {:?}", record.kind(), record.path().display(), action);
                }
                ApplyOutcome::Skipped(reason) => {
                    report.skipped += 1;
                    tracing::debug!("{} {} skipped: {:?}", record.kind(), record.path().display(), reason);
                }
                ApplyOutcome::Failed(err) => {
                    report.failed += 1;
                    tracing::warn!("{} {} failed: {}", record.kind(), record.path().display(), err);
                    self.mirror
                        .log(format!("Skipping {} ({})", record.describe(), err));
                }
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "Reconciled {} changes in {:?}: {} applied, {} skipped, {} failed",
            report.records,
            report.elapsed,
            report.applied,
            report.skipped,
            report.failed
        );
        self.mirror.log(format!(
            "Synchronized {} changes: {} applied, {} skipped, {} failed.",
            report.records, report.applied, report.skipped, report.failed
        ));

        TickOutcome::Completed(report)
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Start ticking `reconciler` every `interval` on a background thread.
    pub fn spawn(reconciler: Arc<Reconciler>, interval: Duration) -> Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("treemirror-sync".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        reconciler.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("Failed to spawn reconciliation thread")?;

        Ok(SchedulerHandle {
            stop_tx,
            thread: Some(thread),
        })
    }
}

pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop ticking. Waits for an in-flight pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Reconciliation thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
