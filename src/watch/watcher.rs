// src/watch/watcher.rs

use std::path::PathBuf;
use std::time::Duration;

use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::errors::Result;
use crate::watch::path_utils::immediate_child;

/// Keeps the poll watcher and its event loop alive. Dropping it stops both.
pub struct WatcherHandle {
    _inner: PollWatcher,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll every watched directory and ingest new immediate children.
///
/// Each event is reduced to the child of its watched root and handled in its
/// own task; the event loop never waits on a package.
pub fn spawn_watcher(engine: Engine, poll_interval: Duration) -> Result<WatcherHandle> {
    let roots: Vec<(usize, PathBuf)> = engine.watched_roots();

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    let mut watcher = PollWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("ingestflow: failed to forward watch event: {err}");
                }
            }
            Err(err) => eprintln!("ingestflow: watch error: {err}"),
        },
        Config::default().with_poll_interval(poll_interval),
    )
    .map_err(anyhow::Error::from)?;

    for (_, root) in roots.iter() {
        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(anyhow::Error::from)?;
        info!(root = %root.display(), ?poll_interval, "watching directory");
    }

    let task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if matches!(event.kind, EventKind::Remove(_) | EventKind::Access(_)) {
                continue;
            }
            for path in event.paths {
                let Some((index, child)) = roots
                    .iter()
                    .find_map(|(i, root)| immediate_child(root, &path).map(|c| (*i, c)))
                else {
                    debug!(path = %path.display(), "event outside watched roots");
                    continue;
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    match engine.ingest(&child, index) {
                        Ok(Some(package)) => debug!(%package, path = %child.display(), "chain started from watch event"),
                        Ok(None) => {}
                        Err(err) => warn!(path = %child.display(), error = %err, "could not ingest path"),
                    }
                });
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        task,
    })
}
