//! File change observers
//!
//! A watch context drives one [`ChangeObserver`] at a time. Two
//! implementations exist: [`NotifyObserver`] relies on OS change
//! notifications, [`PollObserver`] compares modification times on an
//! interval. Both report through a [`ChangeSink`] and never read the file
//! themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::{ObserverKind, WatchConfig};
use super::error::SyncError;

/// What an observer reports about its file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverSignal {
    /// The file may have changed and should be read again
    Changed,
    /// The observer stopped working and needs to be started again
    Failed(String),
}

/// Callback target handed to an observer when it starts
#[derive(Clone)]
pub struct ChangeSink {
    notify: Arc<dyn Fn(ObserverSignal) + Send + Sync>,
}

impl ChangeSink {
    pub fn new(notify: impl Fn(ObserverSignal) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn changed(&self) {
        (self.notify)(ObserverSignal::Changed);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        (self.notify)(ObserverSignal::Failed(reason.into()));
    }
}

/// Capability to observe a single file for changes
pub trait ChangeObserver: Send {
    /// Begin observing `path`; replaces any previous observation
    fn start(&mut self, path: &Path, sink: ChangeSink) -> Result<(), SyncError>;

    /// Stop observing. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Produces a fresh observer for every watch context
pub trait ObserverFactory {
    fn create(&self) -> Box<dyn ChangeObserver>;

    /// Use new settings for observers created from now on
    fn reconfigure(&mut self, config: &WatchConfig);
}

/// Factory choosing the implementation from settings
pub struct ConfiguredObservers {
    config: WatchConfig,
}

impl ConfiguredObservers {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }
}

impl ObserverFactory for ConfiguredObservers {
    fn create(&self) -> Box<dyn ChangeObserver> {
        match self.config.observer {
            ObserverKind::Event => Box::new(NotifyObserver::new(self.config.debounce())),
            ObserverKind::Poll => Box::new(PollObserver::new(self.config.poll_interval())),
        }
    }

    fn reconfigure(&mut self, config: &WatchConfig) {
        tracing::info!("Observers now use {:?}", config.observer);
        self.config = config.clone();
    }
}

/// Observer backed by `notify`, coalescing bursts of events
pub struct NotifyObserver {
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
    forwarder: Option<JoinHandle<()>>,
}

impl NotifyObserver {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            watcher: None,
            forwarder: None,
        }
    }
}

impl ChangeObserver for NotifyObserver {
    fn start(&mut self, path: &Path, sink: ChangeSink) -> Result<(), SyncError> {
        self.stop();

        let observer_error = |e: notify::Error| SyncError::Observer {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();
        let failure_sink = sink.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => {
                        let _ = raw_tx.send(());
                    }
                    // The watch dies with the inode, e.g. on atomic replace
                    EventKind::Remove(_) => failure_sink.failed("file was removed"),
                    _ => {}
                },
                Err(err) => failure_sink.failed(err.to_string()),
            },
        )
        .map_err(observer_error)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(observer_error)?;

        let debounce = self.debounce;
        let forwarder = tokio::spawn(async move {
            while raw_rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                while raw_rx.try_recv().is_ok() {}
                sink.changed();
            }
        });

        self.watcher = Some(watcher);
        self.forwarder = Some(forwarder);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher releases the OS watch and closes the channel
        self.watcher = None;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for NotifyObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Observer comparing modification times on a fixed interval
pub struct PollObserver {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollObserver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
}

impl ChangeObserver for PollObserver {
    fn start(&mut self, path: &Path, sink: ChangeSink) -> Result<(), SyncError> {
        self.stop();

        let path: PathBuf = path.to_path_buf();
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last = modified(&path).await;
            loop {
                ticker.tick().await;
                let current = modified(&path).await;
                if current != last {
                    last = current;
                    sink.changed();
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollObserver {
    fn drop(&mut self) {
        self.stop();
    }
}
