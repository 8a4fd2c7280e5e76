use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use anyhow::{Result, Context};
use crate::{ChangeRecord, Ingestor};

/// How long a rename source waits for its destination half.
const RENAME_WINDOW: Duration = Duration::from_millis(500);
const MAX_PENDING_RENAMES: usize = 256;
const MAX_RECENT_TRACKERS: usize = 64;

/// Feeds filesystem notifications for the source tree into an [`Ingestor`].
///
/// Notifications are processed on a dedicated thread. Dropping the watcher
/// unregisters it and waits for that thread to finish.
pub struct MirrorWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl MirrorWatcher {
    pub fn new<P: AsRef<Path>>(root: P, ingestor: Ingestor) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(tx)
            .context("Failed to create file system watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .context("Failed to start watching directory")?;

        let worker = thread::Builder::new()
            .name("treemirror-watch".to_string())
            .spawn(move || {
                let mut translator = EventTranslator::new(root);
                loop {
                    let records = match rx.recv_timeout(RENAME_WINDOW) {
                        Ok(Ok(event)) => translator.translate(event, Instant::now()),
                        Ok(Err(err)) => {
                            tracing::error!("File watcher error: {}", err);
                            continue;
                        }
                        Err(RecvTimeoutError::Timeout) => translator.flush(Instant::now()),
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    for record in records {
                        ingestor.ingest(record);
                    }
                }
                // Watcher gone: unmatched rename sources left the tree.
                for record in translator.flush_all() {
                    ingestor.ingest(record);
                }
            })
            .context("Failed to spawn watcher thread")?;

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    /// Unregister from the notification source and wait for queued events.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the notify watcher closes the channel and ends the worker.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Watcher thread panicked");
            }
        }
    }
}

impl Drop for MirrorWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Maps raw `notify` events onto change records relative to the root.
///
/// Backends report renames differently: inotify sends a `From` half, a `To`
/// half and then a combined `Both`; Windows sends the halves in sequence.
/// Halves are paired here so a rename reaches ingestion exactly once.
pub struct EventTranslator {
    root: PathBuf,
    pending_renames: VecDeque<(Instant, Option<usize>, PathBuf)>,
    paired_trackers: VecDeque<usize>,
}

impl EventTranslator {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            pending_renames: VecDeque::new(),
            paired_trackers: VecDeque::new(),
        }
    }

    pub fn translate(&mut self, event: Event, now: Instant) -> Vec<ChangeRecord> {
        let mut out = self.flush(now);
        let tracker = event.tracker();

        // Nothing may overtake a rename source still waiting for its
        // destination, so an event that produces records settles them first.
        let keeps_pending = matches!(
            event.kind,
            EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To | RenameMode::Both))
                | EventKind::Modify(ModifyKind::Metadata(_))
                | EventKind::Access(_)
                | EventKind::Any
                | EventKind::Other
        );
        if !keeps_pending {
            out.extend(self.flush_all());
        }

        match event.kind {
            EventKind::Create(_) => {
                out.extend(self.relative_paths(&event.paths).map(ChangeRecord::created));
            }
            EventKind::Remove(_) => {
                out.extend(self.relative_paths(&event.paths).map(ChangeRecord::deleted));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.pending_renames.push_back((now, tracker, path));
                }
                out.extend(self.evict_overflow());
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for to in event.paths {
                    match self.pending_index(tracker) {
                        Some(index) => {
                            out.extend(self.expire_first(index));
                            if let Some((_, _, from)) = self.pending_renames.pop_front() {
                                if let Some(tracker) = tracker {
                                    self.remember_paired(tracker);
                                }
                                out.extend(self.rename(&from, &to));
                            }
                        }
                        None => {
                            out.extend(self.flush_all());
                            out.extend(self.relative(&to).map(ChangeRecord::created));
                        }
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let already_paired = tracker.map_or(false, |t| self.forget_paired(t));
                if !already_paired {
                    out.extend(self.flush_all());
                    let mut paths = event.paths.into_iter();
                    while let Some(from) = paths.next() {
                        match paths.next() {
                            Some(to) => out.extend(self.rename(&from, &to)),
                            None => out.extend(self.relative(&from).map(ChangeRecord::changed)),
                        }
                    }
                }
            }
            // Backends that cannot tell which side of a rename this is.
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if let Some(relative) = self.relative(path) {
                        if path.exists() {
                            out.push(ChangeRecord::created(relative));
                        } else {
                            out.push(ChangeRecord::deleted(relative));
                        }
                    }
                }
            }
            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Other) => {
                out.extend(self.relative_paths(&event.paths).map(ChangeRecord::changed));
            }
            EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => {}
            EventKind::Any | EventKind::Other => {
                tracing::trace!("Ignoring event: {:?}", event);
            }
        }

        out
    }

    /// Rename sources that waited longer than the window became deletions.
    pub fn flush(&mut self, now: Instant) -> Vec<ChangeRecord> {
        let mut out = Vec::new();
        while let Some((seen, _, _)) = self.pending_renames.front() {
            if now.saturating_duration_since(*seen) <= RENAME_WINDOW {
                break;
            }
            if let Some((_, _, path)) = self.pending_renames.pop_front() {
                out.extend(self.relative(&path).map(ChangeRecord::deleted));
            }
        }
        out
    }

    pub fn flush_all(&mut self) -> Vec<ChangeRecord> {
        self.expire_first(self.pending_renames.len())
    }

    fn evict_overflow(&mut self) -> Vec<ChangeRecord> {
        let excess = self.pending_renames.len().saturating_sub(MAX_PENDING_RENAMES);
        self.expire_first(excess)
    }

    /// Turn the `count` oldest rename sources into deletions.
    fn expire_first(&mut self, count: usize) -> Vec<ChangeRecord> {
        let expired: Vec<_> = self.pending_renames.drain(..count).collect();
        expired
            .into_iter()
            .filter_map(|(_, _, path)| self.relative(&path).map(ChangeRecord::deleted))
            .collect()
    }

    fn pending_index(&self, tracker: Option<usize>) -> Option<usize> {
        match tracker {
            Some(tracker) => self
                .pending_renames
                .iter()
                .position(|(_, t, _)| *t == Some(tracker)),
            None if self.pending_renames.is_empty() => None,
            None => Some(0),
        }
    }

    fn remember_paired(&mut self, tracker: usize) {
        self.paired_trackers.push_back(tracker);
        while self.paired_trackers.len() > MAX_RECENT_TRACKERS {
            self.paired_trackers.pop_front();
        }
    }

    fn forget_paired(&mut self, tracker: usize) -> bool {
        match self.paired_trackers.iter().position(|t| *t == tracker) {
            Some(index) => {
                self.paired_trackers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Moves across the root boundary degrade to a create or a delete.
    fn rename(&self, from: &Path, to: &Path) -> Option<ChangeRecord> {
        match (self.relative(from), self.relative(to)) {
            (Some(from), Some(to)) => Some(ChangeRecord::renamed(from, to)),
            (Some(from), None) => Some(ChangeRecord::deleted(from)),
            (None, Some(to)) => Some(ChangeRecord::created(to)),
            (None, None) => None,
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            None
        } else {
            Some(relative.to_path_buf())
        }
    }

    fn relative_paths<'a>(&'a self, paths: &'a [PathBuf]) -> impl Iterator<Item = PathBuf> + 'a {
        paths.iter().filter_map(move |path| self.relative(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn root() -> PathBuf {
        PathBuf::from("/watched")
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(root().join(p)))
    }

    #[test]
    fn test_basic_kinds() {
        let mut t = EventTranslator::new(root());
        let now = Instant::now();

        let created = t.translate(event(EventKind::Create(CreateKind::File), &["a.txt"]), now);
        let changed = t.translate(
            event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["a.txt"]),
            now,
        );
        let removed = t.translate(event(EventKind::Remove(RemoveKind::File), &["a.txt"]), now);
        let chmod = t.translate(
            event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), &["a.txt"]),
            now,
        );

        assert_eq!(created, vec![ChangeRecord::created("a.txt")]);
        assert_eq!(changed, vec![ChangeRecord::changed("a.txt")]);
        assert_eq!(removed, vec![ChangeRecord::deleted("a.txt")]);
        assert!(chmod.is_empty());
    }

    #[test]
    fn test_inotify_style_rename_reported_once() {
        let mut t = EventTranslator::new(root());
        let now = Instant::now();
        let name = |mode| EventKind::Modify(ModifyKind::Name(mode));

        let mut out = Vec::new();
        out.extend(t.translate(event(name(RenameMode::From), &["A"]).set_tracker(7), now));
        out.extend(t.translate(event(name(RenameMode::To), &["B"]).set_tracker(7), now));
        out.extend(t.translate(event(name(RenameMode::Both), &["A", "B"]).set_tracker(7), now));

        assert_eq!(out, vec![ChangeRecord::renamed("A", "B")]);
    }

    #[test]
    fn test_sequential_halves_without_tracker() {
        let mut t = EventTranslator::new(root());
        let now = Instant::now();
        let name = |mode| EventKind::Modify(ModifyKind::Name(mode));

        assert!(t.translate(event(name(RenameMode::From), &["old.txt"]), now).is_empty());
        let out = t.translate(event(name(RenameMode::To), &["new.txt"]), now);

        assert_eq!(out, vec![ChangeRecord::renamed("old.txt", "new.txt")]);
    }

    #[test]
    fn test_unmatched_rename_source_becomes_delete() {
        let mut t = EventTranslator::new(root());
        let start = Instant::now();
        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["moved-out.txt"]);

        assert!(t.translate(from.set_tracker(3), start).is_empty());
        assert!(t.flush(start).is_empty());

        let later = start + RENAME_WINDOW + Duration::from_millis(1);
        assert_eq!(t.flush(later), vec![ChangeRecord::deleted("moved-out.txt")]);
    }

    #[test]
    fn test_pending_rename_source_is_settled_before_later_events() {
        let mut t = EventTranslator::new(root());
        let start = Instant::now();
        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["a.txt"]);

        let mut out = t.translate(from.set_tracker(1), start);
        out.extend(t.translate(
            event(EventKind::Create(CreateKind::File), &["a.txt"]),
            start + Duration::from_millis(100),
        ));
        out.extend(t.flush(start + Duration::from_millis(700)));

        assert_eq!(
            out,
            vec![ChangeRecord::deleted("a.txt"), ChangeRecord::created("a.txt")]
        );
    }

    #[test]
    fn test_unrelated_destination_settles_older_sources_first() {
        let mut t = EventTranslator::new(root());
        let now = Instant::now();
        let name = |mode| EventKind::Modify(ModifyKind::Name(mode));

        let mut out = t.translate(event(name(RenameMode::From), &["gone.txt"]).set_tracker(1), now);
        out.extend(t.translate(event(name(RenameMode::From), &["a.txt"]).set_tracker(2), now));
        out.extend(t.translate(event(name(RenameMode::To), &["b.txt"]).set_tracker(2), now));
        out.extend(t.translate(event(name(RenameMode::Both), &["a.txt", "b.txt"]).set_tracker(2), now));

        assert_eq!(
            out,
            vec![ChangeRecord::deleted("gone.txt"), ChangeRecord::renamed("a.txt", "b.txt")]
        );
    }

    #[test]
    fn test_unmatched_destination_becomes_create() {
        let mut t = EventTranslator::new(root());
        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["moved-in.txt"]);

        let out = t.translate(to.set_tracker(9), Instant::now());

        assert_eq!(out, vec![ChangeRecord::created("moved-in.txt")]);
    }

    #[test]
    fn test_paths_outside_root_are_ignored() {
        let mut t = EventTranslator::new(root());
        let outside = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/elsewhere/x.txt"));
        let root_itself = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(root());

        assert!(t.translate(outside, Instant::now()).is_empty());
        assert!(t.translate(root_itself, Instant::now()).is_empty());
    }
}
