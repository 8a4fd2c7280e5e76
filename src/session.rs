use std::sync::Arc;
use anyhow::Result;
use crate::{
    BuildSummary, FileCopier, Ingestor, LogSink, Mirror, MirrorWatcher, PathFilter,
    PendingChangeSet, Reconciler, Scheduler, SchedulerHandle, SyncConfig,
};

/// A running mirror: initial copy done, watcher and scheduler live.
pub struct Session {
    watcher: MirrorWatcher,
    scheduler: SchedulerHandle,
    changes: Arc<PendingChangeSet>,
    initial: BuildSummary,
}

impl Session {
    /// `config` must already be validated and resolved.
    pub fn start(config: &SyncConfig, copier: Arc<dyn FileCopier>, log: Arc<dyn LogSink>) -> Result<Self> {
        let filter = PathFilter::new(&config.source, &config.exclude)?;
        let mirror = Arc::new(
            Mirror::new(&config.source, &config.mirror, copier, log).with_filter(filter),
        );

        let initial = mirror.build()?;

        let changes = Arc::new(PendingChangeSet::new());
        let ingestor = Ingestor::new(changes.clone(), mirror.clone());
        let watcher = MirrorWatcher::new(&config.source, ingestor)?;

        let reconciler = Arc::new(Reconciler::new(changes.clone(), mirror));
        let scheduler = Scheduler::spawn(reconciler, config.interval())?;

        tracing::info!(
            "Mirroring {} -> {} every {:?}",
            config.source.display(),
            config.mirror.display(),
            config.interval()
        );

        Ok(Self {
            watcher,
            scheduler,
            changes,
            initial,
        })
    }

    pub fn initial_build(&self) -> BuildSummary {
        self.initial
    }

    /// Stop watching, then stop ticking; an in-flight pass runs to completion.
    pub fn stop(self) {
        self.watcher.stop();
        self.scheduler.stop();
        if !self.changes.is_empty() {
            tracing::info!("{} pending changes discarded at shutdown", self.changes.len());
        }
    }
}
