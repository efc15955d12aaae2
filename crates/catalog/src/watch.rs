//! Filesystem event sources.
//!
//! A provider consumes raw [`FsEvent`]s through the [`FsEventSource`] seam:
//! the native implementation wraps a recursive `notify` watcher, the null
//! implementation is used when the watched root does not exist, and the
//! manual implementation lets tests and generated backends inject events
//! directly. Raw events funnel into an `std::sync::mpsc` channel owned by
//! the provider's debounce thread.

use crate::error::CatalogError;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Raw watcher event kinds a provider folds into its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Changed,
    Deleted,
    Renamed,
    /// The watcher overflowed or errored; the provider must resynchronize
    /// with a full enumeration.
    RescanRequired,
}

/// One raw filesystem event.
#[derive(Debug, Clone)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    /// Set only for [`FsEventKind::Renamed`]: the old location.
    pub old_path: Option<PathBuf>,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self { kind: FsEventKind::Created, path: path.into(), old_path: None }
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self { kind: FsEventKind::Changed, path: path.into(), old_path: None }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self { kind: FsEventKind::Deleted, path: path.into(), old_path: None }
    }

    pub fn renamed(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self { kind: FsEventKind::Renamed, path: new.into(), old_path: Some(old.into()) }
    }

    pub fn rescan_required() -> Self {
        Self { kind: FsEventKind::RescanRequired, path: PathBuf::new(), old_path: None }
    }
}

/// Keeps the underlying watcher alive. Dropping the guard stops delivery
/// and disconnects the provider's raw-event channel.
pub struct WatchGuard {
    _keepalive: Mutex<Option<Box<dyn Any + Send>>>,
}

impl WatchGuard {
    pub fn noop() -> Self {
        Self { _keepalive: Mutex::new(None) }
    }
}

/// Source of raw filesystem events.
pub trait FsEventSource: Send + Sync {
    /// Start delivering events into `tx`. The source owns every clone of
    /// `tx`; once the returned guard (and the source, for manual sources)
    /// is dropped, the channel disconnects and the consumer's loop ends.
    fn watch(&self, tx: Sender<FsEvent>) -> Result<WatchGuard, CatalogError>;
}

// ---------------------------------------------------------------------------
// Native watcher
// ---------------------------------------------------------------------------

/// Recursive `notify` watcher over a root, with an optional filename filter.
pub struct NotifyEventSource {
    root: PathBuf,
    filter: Option<String>,
}

impl NotifyEventSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), filter: None }
    }

    /// Only forward events whose file name matches `pattern` (a literal
    /// name, or a single-`*` glob such as `*.bin`).
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }
}

impl FsEventSource for NotifyEventSource {
    fn watch(&self, tx: Sender<FsEvent>) -> Result<WatchGuard, CatalogError> {
        let filter = self.filter.clone();
        // Split rename halves arrive as two notify events; the `From` side
        // is parked here until its `To` half shows up.
        let pending_from: Mutex<Option<PathBuf>> = Mutex::new(None);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("watcher error, requesting rescan: {err}");
                        let _ = tx.send(FsEvent::rescan_required());
                        return;
                    }
                };
                for mapped in map_notify_event(event, &pending_from) {
                    if event_passes_filter(&mapped, filter.as_deref()) {
                        let _ = tx.send(mapped);
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(notify_to_catalog)?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(notify_to_catalog)?;
        debug!("watching {}", self.root.display());

        Ok(WatchGuard { _keepalive: Mutex::new(Some(Box::new(watcher))) })
    }
}

/// Translate one notify event into zero or more [`FsEvent`]s.
fn map_notify_event(event: notify::Event, pending_from: &Mutex<Option<PathBuf>>) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FsEvent::deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => map_rename(mode, event.paths, pending_from),
        EventKind::Modify(_) => event.paths.into_iter().map(FsEvent::changed).collect(),
        // Overflow and unknown watcher conditions force a resync; access
        // events and the rest are noise.
        _ if event.need_rescan() => vec![FsEvent::rescan_required()],
        _ => Vec::new(),
    }
}

fn map_rename(
    mode: RenameMode,
    mut paths: Vec<PathBuf>,
    pending_from: &Mutex<Option<PathBuf>>,
) -> Vec<FsEvent> {
    if paths.is_empty() {
        return Vec::new();
    }
    match mode {
        RenameMode::Both if paths.len() >= 2 => {
            let new = paths.pop().unwrap();
            let old = paths.swap_remove(0);
            vec![FsEvent::renamed(old, new)]
        }
        RenameMode::From => {
            let mut events = Vec::new();
            // Two Froms without a To in between: the first one is a move
            // out of the watched tree. Surface it as a deletion.
            if let Some(stale) = pending_from.lock().unwrap().replace(paths.remove(0)) {
                events.push(FsEvent::deleted(stale));
            }
            events
        }
        RenameMode::To => {
            let new = paths.remove(0);
            match pending_from.lock().unwrap().take() {
                Some(old) => vec![FsEvent::renamed(old, new)],
                // A To with no From half is a move into the watched tree.
                None => vec![FsEvent::created(new)],
            }
        }
        // `Any`/`Other`: platform gave no direction. Report a change so the
        // provider re-evaluates the path.
        _ => paths.into_iter().map(FsEvent::changed).collect(),
    }
}

fn event_passes_filter(event: &FsEvent, filter: Option<&str>) -> bool {
    let Some(pattern) = filter else { return true };
    if event.kind == FsEventKind::RescanRequired {
        return true;
    }
    let name_matches = |path: &Path| {
        path.file_name()
            .map(|name| filename_matches(&name.to_string_lossy(), pattern))
            .unwrap_or(false)
    };
    name_matches(&event.path) || event.old_path.as_deref().is_some_and(name_matches)
}

/// Literal match, or a single-`*` wildcard (`*.bin`, `index.*`, `a*z`).
pub(crate) fn filename_matches(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        None => name == pattern,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

fn notify_to_catalog(err: notify::Error) -> CatalogError {
    match err.kind {
        notify::ErrorKind::Io(io) => CatalogError::Storage(io),
        other => CatalogError::Storage(std::io::Error::other(format!("watcher: {other:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Null and manual sources
// ---------------------------------------------------------------------------

/// Source that never produces events; used when the watched root does not
/// exist. The raw-event channel disconnects immediately, so the consumer's
/// change stream completes as soon as it drains.
pub struct NullEventSource;

impl FsEventSource for NullEventSource {
    fn watch(&self, _tx: Sender<FsEvent>) -> Result<WatchGuard, CatalogError> {
        Ok(WatchGuard::noop())
    }
}

/// Source driven by hand. Tests and in-process backends push events with
/// [`ManualEventSource::emit`]; every watching consumer receives them.
#[derive(Default)]
pub struct ManualEventSource {
    senders: Mutex<Vec<Sender<FsEvent>>>,
}

impl ManualEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to all current watchers.
    pub fn emit(&self, event: FsEvent) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl FsEventSource for ManualEventSource {
    fn watch(&self, tx: Sender<FsEvent>) -> Result<WatchGuard, CatalogError> {
        self.senders.lock().unwrap().push(tx);
        Ok(WatchGuard::noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn filename_patterns() {
        assert!(filename_matches("container.index.bin", "container.index.bin"));
        assert!(filename_matches("container.index.bin", "*.bin"));
        assert!(filename_matches("container.index.bin", "container.*"));
        assert!(filename_matches("abcz", "a*z"));
        assert!(!filename_matches("container.index.bin", "*.idx"));
        assert!(!filename_matches("az", "ab*z"));
    }

    #[test]
    fn manual_source_fans_out_and_disconnects() {
        let source = ManualEventSource::new();
        let (tx, rx) = mpsc::channel();
        let _guard = source.watch(tx).unwrap();

        source.emit(FsEvent::created("/tmp/a"));
        assert_eq!(rx.recv().unwrap().kind, FsEventKind::Created);

        drop(source);
        assert!(rx.recv().is_err(), "channel should disconnect when the source drops");
    }

    #[test]
    fn split_rename_halves_pair_up() {
        let pending = Mutex::new(None);
        let from = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/r/a.txt".into());
        let to = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/r/b.txt".into());

        assert!(map_notify_event(from, &pending).is_empty());
        let events = map_notify_event(to, &pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FsEventKind::Renamed);
        assert_eq!(events[0].path, PathBuf::from("/r/b.txt"));
        assert_eq!(events[0].old_path, Some(PathBuf::from("/r/a.txt")));
    }

    #[test]
    fn orphan_rename_halves_degrade() {
        let pending = Mutex::new(None);
        let from1 = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/r/a".into());
        let from2 = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/r/b".into());
        assert!(map_notify_event(from1, &pending).is_empty());
        let events = map_notify_event(from2, &pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FsEventKind::Deleted);
        assert_eq!(events[0].path, PathBuf::from("/r/a"));

        let lone_to = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/r/c".into());
        let events = map_notify_event(lone_to, &pending);
        assert_eq!(events[0].kind, FsEventKind::Created);
    }
}
