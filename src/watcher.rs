//! Debounced filesystem watching (spec.md §4.6). Wholly new relative to
//! the teacher, which carries `notify` in its `Cargo.toml` but never
//! wires it up; built in the style of the teacher's channel-based
//! `scanner.rs` producer/consumer plumbing.

use crate::indexer::Indexer;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Coalesces a burst of filesystem events into a single re-index per
/// path, waiting `WATCH_STABILITY_WINDOW_MS` of silence before firing
/// and at most `WATCH_DEBOUNCE_WINDOW_MS` overall (spec.md §4.6).
///
/// `stop()` is idempotent (spec.md §4.6 "Start/stop"): dropping the
/// underlying `notify` watcher closes its event subscription (which in
/// turn disconnects the debounce loop's channel and unblocks it), and
/// aborting the poll task cancels any pending debounce timers.
pub struct DebouncedWatcher {
    watcher: StdMutex<Option<RecommendedWatcher>>,
    main_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl DebouncedWatcher {
    pub fn start(root: PathBuf, indexer: Arc<Indexer>) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (poll_task, main_task) = spawn_debounce_loop(rx, indexer);

        Ok(Self {
            watcher: StdMutex::new(Some(watcher)),
            main_task,
            poll_task,
        })
    }

    /// Cancels the watch subscription and the pending debounce timers.
    /// Safe to call more than once (spec.md §5 "Cancellation").
    pub fn stop(&self) {
        if let Ok(mut guard) = self.watcher.lock() {
            // Dropping the watcher drops the closure that owns the event
            // sender, which disconnects `rx` and unblocks the main loop's
            // `recv_timeout`.
            guard.take();
        }
        self.main_task.abort();
        self.poll_task.abort();
    }
}

/// Spawns the debounce-poll task and the event-receive loop, returning
/// both join handles so `DebouncedWatcher::stop` can cancel them.
fn spawn_debounce_loop(rx: mpsc::Receiver<Event>, indexer: Arc<Indexer>) -> (JoinHandle<()>, JoinHandle<()>) {
    let pending: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

    let poll_pending = Arc::clone(&pending);
    let poll_indexer = Arc::clone(&indexer);
    let poll_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut ready = Vec::new();
            {
                let mut map = poll_pending.lock().await;
                let now = Instant::now();
                map.retain(|path, last_seen| {
                    if now.duration_since(*last_seen) >= Duration::from_millis(crate::config::WATCH_DEBOUNCE_WINDOW_MS) {
                        ready.push(path.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            for path in ready {
                if let Err(e) = poll_indexer.index_file(&path).await {
                    tracing::warn!(error = %e, path = %path.display(), "watcher re-index failed");
                }
            }
        }
    });

    let main_task = tokio::spawn(async move {
        run_debounce_loop(rx, indexer, pending).await;
    });

    (poll_task, main_task)
}

/// Debounced upserts wait `WATCH_DEBOUNCE_WINDOW_MS` of silence on a path
/// before firing, so a burst of writes (stabilizing over
/// `WATCH_STABILITY_WINDOW_MS`-ish) collapses into one re-index. Deletes
/// are not debounced at all (spec.md §4.6): they fire immediately and
/// also cancel any upsert still pending for the same path.
async fn run_debounce_loop(rx: mpsc::Receiver<Event>, indexer: Arc<Indexer>, pending: Arc<Mutex<HashMap<PathBuf, Instant>>>) {
    loop {
        match rx.recv_timeout(Duration::from_millis(crate::config::WATCH_STABILITY_WINDOW_MS)) {
            Ok(event) => {
                for path in event.paths {
                    if !is_relevant(&path) {
                        continue;
                    }
                    match event.kind {
                        EventKind::Remove(_) => {
                            let mut map = pending.lock().await;
                            map.remove(&path);
                            drop(map);
                            if let Err(e) = indexer.remove_file(&path).await {
                                tracing::warn!(error = %e, path = %path.display(), "watcher delete failed");
                            }
                        }
                        EventKind::Create(_) | EventKind::Modify(_) => {
                            let mut map = pending.lock().await;
                            map.insert(path, Instant::now());
                        }
                        _ => continue,
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn is_relevant(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    let path_str = path.to_string_lossy();
    !crate::config::DEFAULT_IGNORE_PATTERNS.iter().any(|pat| glob_matches(pat, &path_str))
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    let needle = pattern.trim_start_matches("**/").trim_end_matches("/**").trim_start_matches('*');
    !needle.is_empty() && path.contains(needle)
}
