//! File watching for live reload.
//!
//! Each [`FileWatcher`] owns one notify watcher and one channel. Raw events
//! are filtered, deduplicated and held until the watched tree has been quiet
//! for the debounce window, then delivered as a single [`ChangeBatch`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Quiet period before a batch is released.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Paths changed during one burst of file events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub paths: Vec<PathBuf>,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Trailing-edge debouncer.
struct Debouncer {
    window: Duration,
    changes: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            changes: BTreeSet::new(),
            last_event: None,
        }
    }

    fn add_event(&mut self, event: &notify::Event, filter: &dyn Fn(&Path) -> bool) {
        match event.kind {
            EventKind::Create(_) | EventKind::Remove(_) => {}
            // Metadata-only changes would retrigger on our own writes.
            EventKind::Modify(ModifyKind::Metadata(_)) => return,
            EventKind::Modify(_) => {}
            _ => return,
        }

        for path in &event.paths {
            if filter(path) {
                self.add_path(path.clone());
            }
        }
    }

    fn add_path(&mut self, path: PathBuf) {
        self.changes.insert(path);
        self.last_event = Some(Instant::now());
    }

    fn is_ready(&self) -> bool {
        match self.last_event {
            Some(last) => last.elapsed() >= self.window && !self.changes.is_empty(),
            None => false,
        }
    }

    fn take_if_ready(&mut self) -> Option<ChangeBatch> {
        if !self.is_ready() {
            return None;
        }
        self.take()
    }

    fn take(&mut self) -> Option<ChangeBatch> {
        self.last_event = None;
        let paths: Vec<PathBuf> = std::mem::take(&mut self.changes).into_iter().collect();
        if paths.is_empty() {
            None
        } else {
            Some(ChangeBatch { paths })
        }
    }

    /// Time until the pending batch is due.
    fn sleep_duration(&self) -> Duration {
        match self.last_event {
            Some(last) => self
                .window
                .saturating_sub(last.elapsed())
                .max(Duration::from_millis(1)),
            None => Duration::from_secs(86400),
        }
    }
}

/// File watcher over one path set.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    /// Watched paths and whether each is recursive
    watched: Vec<(PathBuf, bool)>,
}

impl FileWatcher {
    /// Watch `paths` recursively, keeping only paths accepted by `filter`.
    ///
    /// Returns the watcher and a channel of debounced batches. The channel
    /// closes when the watcher is dropped. Paths that do not exist yet are
    /// skipped.
    pub fn new<F>(
        paths: &[PathBuf],
        filter: F,
    ) -> Result<(Self, async_mpsc::Receiver<ChangeBatch>), std::io::Error>
    where
        F: Fn(&Path) -> bool + Send + 'static,
    {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        let mut watched = Vec::with_capacity(paths.len());
        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
                watched.push((path.clone(), true));
            } else {
                tracing::debug!("Not watching {}: does not exist", path.display());
            }
        }

        std::thread::spawn(move || {
            let mut debouncer = Debouncer::new(DEBOUNCE);

            loop {
                match sync_rx.recv_timeout(debouncer.sleep_duration()) {
                    Ok(event) => debouncer.add_event(&event, &filter),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if let Some(batch) = debouncer.take_if_ready() {
                    if async_tx.blocking_send(batch).is_err() {
                        break;
                    }
                }
            }
        });

        Ok((Self { watcher, watched }, async_rx))
    }

    /// Whether changes directly inside `dir` are already reported.
    pub fn covers(&self, dir: &Path) -> bool {
        self.watched.iter().any(|(path, recursive)| {
            if *recursive {
                dir.starts_with(path)
            } else {
                dir == path
            }
        })
    }

    /// Add `dir` to the watch, without its subdirectories. Returns `false`
    /// when it was already covered.
    pub fn watch_dir(&mut self, dir: &Path) -> Result<bool, std::io::Error> {
        if self.covers(dir) {
            return Ok(false);
        }
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(std::io::Error::other)?;
        self.watched.push((dir.to_path_buf(), false));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    fn modify() -> EventKind {
        EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content))
    }

    fn scss_only(path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "scss")
    }

    #[test]
    fn debouncer_starts_empty() {
        let debouncer = Debouncer::new(DEBOUNCE);
        assert!(!debouncer.is_ready());
        assert!(debouncer.sleep_duration() >= Duration::from_secs(3600));
    }

    #[test]
    fn coalesces_burst_into_one_batch() {
        let mut debouncer = Debouncer::new(Duration::ZERO);

        debouncer.add_event(&event(modify(), &["/p/_vars.scss"]), &scss_only);
        debouncer.add_event(&event(modify(), &["/p/_vars.scss"]), &scss_only);
        debouncer.add_event(
            &event(
                EventKind::Create(notify::event::CreateKind::File),
                &["/p/styles.scss"],
            ),
            &scss_only,
        );

        let batch = debouncer.take_if_ready().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(debouncer.take_if_ready().is_none());
    }

    #[test]
    fn waits_for_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));

        debouncer.add_event(&event(modify(), &["/p/a.scss"]), &scss_only);

        assert!(debouncer.take_if_ready().is_none());
        assert!(debouncer.sleep_duration() <= Duration::from_secs(60));
    }

    #[test]
    fn ignores_filtered_paths_and_metadata() {
        let mut debouncer = Debouncer::new(Duration::ZERO);

        debouncer.add_event(&event(modify(), &["/p/notes.txt"]), &scss_only);
        debouncer.add_event(
            &event(
                EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Any)),
                &["/p/a.scss"],
            ),
            &scss_only,
        );
        debouncer.add_event(
            &event(
                EventKind::Access(notify::event::AccessKind::Any),
                &["/p/a.scss"],
            ),
            &scss_only,
        );

        assert!(debouncer.take_if_ready().is_none());
    }

    #[tokio::test]
    async fn watches_file_changes() {
        let temp = tempdir().unwrap();
        let test_file = temp.path().join("styles.scss");

        let (watcher, mut rx) = FileWatcher::new(&[temp.path().to_path_buf()], |_| true).unwrap();

        // Give inotify time to set up
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&test_file, "body {}").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;

        drop(watcher);

        assert!(batch.is_ok(), "timeout waiting for file watch event");
        let batch = batch.unwrap().expect("channel should not be closed");
        assert!(batch.paths.iter().any(|p| p.ends_with("styles.scss")));
    }

    #[test]
    fn added_directories_are_covered_once() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let vendor = temp.path().join("vendor");
        fs::create_dir_all(src.join("js")).unwrap();
        fs::create_dir_all(vendor.join("nested")).unwrap();

        let (mut watcher, _rx) = FileWatcher::new(&[src.clone()], |_: &Path| true).unwrap();

        assert!(watcher.covers(&src.join("js")));
        assert!(!watcher.covers(&vendor));
        assert!(!watcher.watch_dir(&src.join("js")).unwrap());
        assert!(watcher.watch_dir(&vendor).unwrap());
        assert!(watcher.covers(&vendor));
        assert!(!watcher.covers(&vendor.join("nested")));
        assert!(!watcher.watch_dir(&vendor).unwrap());
    }
}
