//! File system watcher for dev sessions.
//!
//! Watches the project directory recursively and publishes a
//! [`FileChangedEvent`] on the bus for every relevant change, ignoring
//! configured patterns, hidden paths and rapid repeats of the same path.

use crate::error::{DevError, Result};
use crate::events::FileChangedEvent;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tether_bus::EventBus;

/// Recursive watcher publishing to the event bus.
///
/// Watching stops when the value is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Starts watching `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or the platform watcher cannot
    /// be created.
    pub fn start(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
        bus: EventBus,
    ) -> Result<Self> {
        if !root.exists() {
            return Err(DevError::FileNotFound(root));
        }

        let debounce = Duration::from_millis(debounce_ms);
        let mut debouncer = Debouncer::new(debounce);
        let filter_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "file watcher error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_)
                    | notify::EventKind::Modify(_)
                    | notify::EventKind::Remove(_)
            ) {
                return;
            }

            for path in event.paths {
                if should_ignore(&path, &filter_root, &ignore_patterns) {
                    continue;
                }
                if !debouncer.accept(&path, Instant::now()) {
                    continue;
                }
                tracing::debug!(path = %path.display(), "file changed");
                if let Err(err) = bus.publish(FileChangedEvent { path }) {
                    tracing::warn!(error = %err, "failed to publish file change");
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Per-path debounce window.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Whether a change to `path` at `now` should be reported.
    fn accept(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get(path) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_seen.insert(path.to_path_buf(), now);
        // Bounded memory on long sessions
        if self.last_seen.len() > 4096 {
            let window = self.window;
            self.last_seen
                .retain(|_, seen| now.duration_since(*seen) < window);
        }
        true
    }
}

/// Whether a change at `path` should be dropped.
///
/// Paths outside `root`, hidden paths, and paths matching a pattern are
/// ignored. `*.ext` patterns match suffixes; other patterns match a leading
/// path segment anywhere under `root`.
fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
    let Ok(rel_path) = path.strip_prefix(root) else {
        return true;
    };
    let path_str = rel_path.to_string_lossy();

    for pattern in ignore_patterns {
        if let Some(suffix) = pattern.strip_prefix('*') {
            if path_str.ends_with(suffix) {
                return true;
            }
        } else if path_str.starts_with(pattern.as_str())
            || path_str.contains(&format!("/{}", pattern))
        {
            return true;
        }
    }

    rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
    })
}
