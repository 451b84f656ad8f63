//! Directory watching.
//!
//! A [`DirectoryWatcher`] owns one background thread per watched directory.
//! The thread first reports every matching file already present as a
//! synthetic [`WatchKind::Modified`] event, then forwards file system events
//! one at a time, in the order the OS reports them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("cannot list {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("file system notifications failed: {0}")]
    Fatal(String),

    #[error("watcher thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Created,
    Modified,
    Deleted,
}

/// A change to one configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Receives the events of a [`DirectoryWatcher`], one at a time.
pub trait WatchHandler: Send + Sync + 'static {
    fn handle(&self, event: &WatchEvent);
}

/// Handle to a running watch loop.
///
/// Dropping the handle stops the loop.
#[derive(Debug)]
pub struct DirectoryWatcher {
    base_path: PathBuf,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<Result<(), WatchError>>>,
}

impl DirectoryWatcher {
    /// Starts watching `base_path` for files named `*.<extension>`.
    ///
    /// The watch is registered before the directory is listed, so a file
    /// appearing during startup is reported at least once.
    pub fn start<H: WatchHandler>(
        base_path: impl AsRef<Path>,
        extension: &str,
        handler: Arc<H>,
    ) -> Result<Self, WatchError> {
        let base_path = base_path.as_ref();
        let base = base_path.canonicalize().map_err(|e| WatchError::Snapshot {
            path: base_path.to_path_buf(),
            source: e,
        })?;

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = event_tx.send(res);
        })
        .map_err(|e| WatchError::Init {
            path: base.clone(),
            source: e,
        })?;
        watcher
            .watch(&base, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Init {
                path: base.clone(),
                source: e,
            })?;

        let initial = snapshot(&base, extension)?;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let worker = Worker {
            base: base.clone(),
            extension: extension.to_string(),
            handler,
            watcher,
            events: event_rx,
            stop: stop_rx,
        };
        let handle = thread::Builder::new()
            .name("confsync-watcher".to_string())
            .spawn(move || worker.run(initial))
            .map_err(WatchError::Spawn)?;

        info!(path = %base.display(), extension, "watching configuration directory");

        Ok(Self {
            base_path: base,
            stop_tx: Some(stop_tx),
            worker: Some(handle),
        })
    }

    /// The canonical directory being watched.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Asks the loop to exit at its next event boundary. Does not wait.
    pub fn stop(&mut self) {
        self.stop_tx.take();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.stop_tx.is_none()
    }

    /// Returns `true` once the loop has exited, whether stopped or failed.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the loop to exit and returns how it ended.
    pub fn wait(mut self) -> Result<(), WatchError> {
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| WatchError::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<H> {
    base: PathBuf,
    extension: String,
    handler: Arc<H>,
    watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
    stop: Receiver<()>,
}

impl<H: WatchHandler> Worker<H> {
    fn run(mut self, initial: Vec<PathBuf>) -> Result<(), WatchError> {
        for path in initial {
            if self.stop_requested() {
                return Ok(());
            }
            self.handler.handle(&WatchEvent::new(WatchKind::Modified, path));
        }

        let events = self.events.clone();
        let stop = self.stop.clone();
        loop {
            select! {
                recv(stop) -> _ => {
                    info!(path = %self.base.display(), "stopped watching configuration directory");
                    return Ok(());
                }
                recv(events) -> message => match message {
                    Ok(Ok(event)) => self.dispatch(event)?,
                    Ok(Err(e)) => {
                        error!(path = %self.base.display(), error = %e, "file system watch failed");
                        return Err(WatchError::Fatal(e.to_string()));
                    }
                    Err(_) => {
                        error!(path = %self.base.display(), "file system notification channel closed");
                        return Err(WatchError::Fatal("notification channel closed".to_string()));
                    }
                },
            }
        }
    }

    /// Stop is signalled by the sender being dropped or by a message.
    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    fn dispatch(&mut self, event: notify::Event) -> Result<(), WatchError> {
        if event.need_rescan() {
            warn!(
                path = %self.base.display(),
                "file system event queue overflowed, events may have been lost; resubscribing"
            );
            return self.resubscribe();
        }

        for watch_event in translate(&event, &self.base, &self.extension) {
            if self.stop_requested() {
                return Ok(());
            }
            self.handler.handle(&watch_event);
        }
        Ok(())
    }

    fn resubscribe(&mut self) -> Result<(), WatchError> {
        if let Err(e) = self.watcher.unwatch(&self.base) {
            debug!(path = %self.base.display(), error = %e, "unwatch before resubscribing failed");
        }
        self.watcher
            .watch(&self.base, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Fatal(e.to_string()))
    }
}

fn matches_extension(name: &str, extension: &str) -> bool {
    name.strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
        .is_some_and(|stem| !stem.is_empty())
}

/// Regular files directly under `base` whose name ends with `.<extension>`.
fn snapshot(base: &Path, extension: &str) -> Result<Vec<PathBuf>, WatchError> {
    let entries = fs::read_dir(base).map_err(|e| WatchError::Snapshot {
        path: base.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| matches_extension(name, extension))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Maps a notify event onto watch events for matching files under `base`.
fn translate(event: &notify::Event, base: &Path, extension: &str) -> Vec<WatchEvent> {
    let kinds: Vec<(WatchKind, &PathBuf)> = match event.kind {
        EventKind::Create(_) => tag_all(WatchKind::Created, &event.paths),
        EventKind::Remove(_) => tag_all(WatchKind::Deleted, &event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tag_all(WatchKind::Deleted, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tag_all(WatchKind::Created, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![(WatchKind::Deleted, from), (WatchKind::Created, to)],
            _ => Vec::new(),
        },
        // Rename without a direction: decide by whether the file is still there.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    WatchKind::Created
                } else {
                    WatchKind::Deleted
                };
                (kind, p)
            })
            .collect(),
        EventKind::Modify(_) => tag_all(WatchKind::Modified, &event.paths),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            debug!(kind = ?event.kind, "ignoring file system event");
            Vec::new()
        }
    };

    kinds
        .into_iter()
        .filter_map(|(kind, path)| {
            let name = path.file_name()?.to_str()?;
            matches_extension(name, extension).then(|| WatchEvent::new(kind, base.join(name)))
        })
        .collect()
}

fn tag_all(kind: WatchKind, paths: &[PathBuf]) -> Vec<(WatchKind, &PathBuf)> {
    paths.iter().map(|p| (kind, p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Recorder {
        tx: Sender<WatchEvent>,
    }

    impl WatchHandler for Recorder {
        fn handle(&self, event: &WatchEvent) {
            let _ = self.tx.send(event.clone());
        }
    }

    fn recorder() -> (Arc<Recorder>, Receiver<WatchEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Recorder { tx }), rx)
    }

    /// Receives events until one matches, failing after a few seconds.
    fn wait_for(rx: &Receiver<WatchEvent>, wanted: impl Fn(&WatchEvent) -> bool) -> WatchEvent {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(event) if wanted(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for watch event"),
            }
        }
    }

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_translate_filters_by_extension() {
        let base = Path::new("/conf");
        let created = event(
            EventKind::Create(CreateKind::File),
            &["/conf/a.conf", "/conf/notes.txt", "/conf/.conf"],
        );
        assert_eq!(
            translate(&created, base, "conf"),
            vec![WatchEvent::new(WatchKind::Created, "/conf/a.conf")]
        );
    }

    #[test]
    fn test_translate_kinds() {
        let base = Path::new("/conf");
        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/conf/a.conf"],
        );
        let removed = event(EventKind::Remove(RemoveKind::File), &["/conf/a.conf"]);
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/conf/old.conf", "/conf/new.conf"],
        );
        let accessed = event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["/conf/a.conf"],
        );

        assert_eq!(
            translate(&modified, base, "conf"),
            vec![WatchEvent::new(WatchKind::Modified, "/conf/a.conf")]
        );
        assert_eq!(
            translate(&removed, base, "conf"),
            vec![WatchEvent::new(WatchKind::Deleted, "/conf/a.conf")]
        );
        assert_eq!(
            translate(&renamed, base, "conf"),
            vec![
                WatchEvent::new(WatchKind::Deleted, "/conf/old.conf"),
                WatchEvent::new(WatchKind::Created, "/conf/new.conf"),
            ]
        );
        assert!(translate(&accessed, base, "conf").is_empty());
    }

    #[test]
    fn test_overflow_resubscribes_and_keeps_delivering() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let (handler, seen) = recorder();

        let mut watcher = notify::recommended_watcher(|_: notify::Result<notify::Event>| {}).unwrap();
        watcher.watch(&base, RecursiveMode::NonRecursive).unwrap();

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = Worker {
            base: base.clone(),
            extension: "conf".to_string(),
            handler,
            watcher,
            events: event_rx,
            stop: stop_rx,
        };
        let handle = thread::spawn(move || worker.run(Vec::new()));

        let overflow = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert!(overflow.need_rescan());
        event_tx.send(Ok(overflow)).unwrap();
        let created = base.join("late.conf");
        event_tx
            .send(Ok(notify::Event::new(EventKind::Create(CreateKind::File)).add_path(created.clone())))
            .unwrap();

        let event = seen.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, WatchEvent::new(WatchKind::Created, created));
        assert!(!handle.is_finished());

        drop(stop_tx);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_startup_reports_existing_files_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.conf"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b-f.conf"), "y = 2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("sub.conf")).unwrap();

        let (handler, rx) = recorder();
        let mut watcher = DirectoryWatcher::start(dir.path(), "conf", handler).unwrap();

        let mut identities = Vec::new();
        for _ in 0..2 {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(event.kind, WatchKind::Modified);
            identities.push(Identity::from_path(&event.path, "conf").unwrap());
        }
        identities.sort_by(|a, b| a.id().cmp(b.id()));

        assert_eq!(
            identities,
            vec![Identity::new("a", None), Identity::new("b", Some("f".into()))]
        );
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        watcher.stop();
        watcher.wait().unwrap();
    }

    #[test]
    fn test_reports_created_and_deleted_files() {
        let dir = TempDir::new().unwrap();
        let (handler, rx) = recorder();
        let watcher = DirectoryWatcher::start(dir.path(), "conf", handler).unwrap();
        let path = watcher.base_path().join("late.conf");

        fs::write(&path, "x = 1\n").unwrap();
        let seen = wait_for(&rx, |e| e.path == path && e.kind != WatchKind::Deleted);
        assert_eq!(seen.path, path);

        fs::remove_file(&path).unwrap();
        wait_for(&rx, |e| e.path == path && e.kind == WatchKind::Deleted);

        fs::write(watcher.base_path().join("ignored.txt"), "x").unwrap();
        drop(watcher);
    }

    #[test]
    fn test_stop_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let (handler, rx) = recorder();
        let mut watcher = DirectoryWatcher::start(dir.path(), "conf", handler).unwrap();

        watcher.stop();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !watcher.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(watcher.is_finished());
        watcher.wait().unwrap();

        fs::write(dir.path().join("after.conf"), "x = 1\n").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_missing_directory_fails_to_start() {
        let (handler, _rx) = recorder();
        let result = DirectoryWatcher::start("/nonexistent/confsync/dir", "conf", handler);
        assert!(matches!(result, Err(WatchError::Snapshot { .. })));
    }
}
