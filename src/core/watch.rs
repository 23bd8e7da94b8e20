//! Watch context: a single-file mirror between disk and one endpoint

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::SyncError;
use super::observer::{ChangeObserver, ChangeSink};

/// Identity of one watch context, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Outcome of comparing a fresh read against the baseline
#[derive(Debug)]
pub enum Observation {
    /// Same as the baseline, nothing to push
    Unchanged,
    /// New content, already recorded as the baseline
    Changed(String),
    Failed(SyncError),
}

/// Tracks one watched file and the last content both sides agree on
pub struct WatchContext {
    id: ContextId,
    path: PathBuf,
    last_known: Option<String>,
    observer: Box<dyn ChangeObserver>,
    watching: bool,
    reconnect_pending: bool,
}

impl WatchContext {
    pub fn new(id: ContextId, path: PathBuf, observer: Box<dyn ChangeObserver>) -> Self {
        Self {
            id,
            path,
            last_known: None,
            observer,
            watching: false,
            reconnect_pending: false,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn last_known(&self) -> Option<&str> {
        self.last_known.as_deref()
    }

    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Enter the watching state and install the observer.
    ///
    /// The context is watching even when the observer fails to start; the
    /// caller is expected to schedule a reconnect.
    pub fn start(&mut self, sink: ChangeSink) -> Result<(), SyncError> {
        self.watching = true;
        tracing::info!("Watching {} ({})", self.path.display(), self.id);
        self.observer.start(&self.path, sink)
    }

    /// Stop the observer and leave the watching state
    pub fn release(&mut self) {
        if !self.watching {
            return;
        }
        self.observer.stop();
        self.watching = false;
        self.reconnect_pending = false;
        tracing::info!("Released watch on {} ({})", self.path.display(), self.id);
    }

    /// Stop a broken observer while staying in the watching state.
    ///
    /// Returns `true` when a reconnect should be scheduled, `false` when one
    /// is already pending or the context is no longer watching.
    pub fn suspend(&mut self) -> bool {
        if !self.watching || self.reconnect_pending {
            return false;
        }
        self.observer.stop();
        self.reconnect_pending = true;
        true
    }

    /// Start the observer again after a backoff
    pub fn reconnect(&mut self, sink: ChangeSink) -> Result<(), SyncError> {
        self.reconnect_pending = false;
        self.observer.stop();
        self.observer.start(&self.path, sink)
    }

    /// Classify a read result against the baseline.
    ///
    /// Only new, successfully decoded content advances the baseline.
    pub fn observe(&mut self, result: Result<String, SyncError>) -> Observation {
        match result {
            Err(e) => Observation::Failed(e),
            Ok(content) if self.last_known.as_deref() == Some(content.as_str()) => {
                Observation::Unchanged
            }
            Ok(content) => {
                self.last_known = Some(content.clone());
                Observation::Changed(content)
            }
        }
    }

    /// Record content coming from the UI and decide whether it needs writing.
    ///
    /// The baseline moves before any write is issued, so the change event the
    /// write produces reads back as already known.
    pub fn accept_save(&mut self, path: &Path, content: &str) -> bool {
        if path != self.path {
            tracing::debug!(
                "Ignoring save for {}: watching {}",
                path.display(),
                self.path.display()
            );
            return false;
        }
        if self.last_known.as_deref() == Some(content) {
            tracing::debug!("Ignoring save for {}: content unchanged", path.display());
            return false;
        }
        self.last_known = Some(content.to_string());
        true
    }
}

impl Drop for WatchContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode file bytes as UTF-8 text, rejecting anything that needed replacement
pub fn decode_text(path: &Path, bytes: &[u8]) -> Result<String, SyncError> {
    let content = String::from_utf8_lossy(bytes);
    if content.contains('\u{FFFD}') {
        return Err(SyncError::BinaryFile {
            path: path.to_path_buf(),
        });
    }
    Ok(content.into_owned())
}

/// Read a watched file as text
pub async fn read_text(path: &Path) -> Result<String, SyncError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SyncError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_text(path, &bytes)
}

/// Write text to a watched file
pub async fn write_text(path: &Path, content: &str) -> Result<(), SyncError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| SyncError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::testing::ManualObservers;
    use crate::core::observer::ObserverFactory;

    fn context(observers: &ManualObservers, path: &str) -> WatchContext {
        WatchContext::new(ContextId(1), PathBuf::from(path), observers.create())
    }

    fn noop_sink() -> ChangeSink {
        ChangeSink::new(|_| {})
    }

    #[test]
    fn test_observe_classifies_against_baseline() {
        let observers = ManualObservers::default();
        let mut ctx = context(&observers, "/tmp/a.md");

        assert!(matches!(ctx.observe(Ok("X".into())), Observation::Changed(c) if c == "X"));
        assert_eq!(ctx.last_known(), Some("X"));
        assert!(matches!(ctx.observe(Ok("X".into())), Observation::Unchanged));
        assert!(matches!(ctx.observe(Ok("Y".into())), Observation::Changed(c) if c == "Y"));
    }

    #[test]
    fn test_failed_read_keeps_baseline() {
        let observers = ManualObservers::default();
        let mut ctx = context(&observers, "/tmp/a.md");
        ctx.observe(Ok("X".into()));

        let failed = ctx.observe(Err(SyncError::BinaryFile {
            path: PathBuf::from("/tmp/a.md"),
        }));
        assert!(matches!(failed, Observation::Failed(SyncError::BinaryFile { .. })));
        assert_eq!(ctx.last_known(), Some("X"));
    }

    #[test]
    fn test_accept_save_rules() {
        let observers = ManualObservers::default();
        let mut ctx = context(&observers, "/tmp/a.md");
        ctx.observe(Ok("X".into()));

        assert!(!ctx.accept_save(Path::new("/tmp/b.md"), "Y"));
        assert_eq!(ctx.last_known(), Some("X"));
        assert!(!ctx.accept_save(Path::new("/tmp/a.md"), "X"));
        assert!(ctx.accept_save(Path::new("/tmp/a.md"), "Y"));
        assert_eq!(ctx.last_known(), Some("Y"));
        assert!(!ctx.accept_save(Path::new("/tmp/a.md"), "Y"));
    }

    #[test]
    fn test_release_is_idempotent_and_stops_observer() {
        let observers = ManualObservers::default();
        let mut ctx = context(&observers, "/tmp/a.md");
        ctx.start(noop_sink()).unwrap();
        assert_eq!(observers.active(), vec![PathBuf::from("/tmp/a.md")]);

        ctx.release();
        ctx.release();
        assert!(!ctx.is_watching());
        assert!(observers.active().is_empty());
    }

    #[test]
    fn test_drop_releases_observer() {
        let observers = ManualObservers::default();
        {
            let mut ctx = context(&observers, "/tmp/a.md");
            ctx.start(noop_sink()).unwrap();
            assert_eq!(observers.active().len(), 1);
        }
        assert!(observers.active().is_empty());
    }

    #[test]
    fn test_suspend_only_schedules_once() {
        let observers = ManualObservers::default();
        let mut ctx = context(&observers, "/tmp/a.md");
        ctx.start(noop_sink()).unwrap();

        assert!(ctx.suspend());
        assert!(!ctx.suspend());
        assert!(ctx.is_watching());
        assert!(observers.active().is_empty());

        ctx.reconnect(noop_sink()).unwrap();
        assert_eq!(observers.active().len(), 1);
    }

    #[test]
    fn test_decode_text_rejects_invalid_utf8() {
        let path = Path::new("/tmp/a.bin");
        assert_eq!(decode_text(path, "héllo".as_bytes()).unwrap(), "héllo");
        assert!(matches!(
            decode_text(path, &[0x89, 0x50, 0x4e, 0x47, 0xff]),
            Err(SyncError::BinaryFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_and_write_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");

        write_text(&path, "# Notes\n").await.unwrap();
        assert_eq!(read_text(&path).await.unwrap(), "# Notes\n");

        let missing = read_text(&dir.path().join("missing.md")).await;
        assert!(matches!(missing, Err(SyncError::Read { .. })));

        let into_dir = write_text(dir.path(), "nope").await;
        assert!(matches!(into_dir, Err(SyncError::Write { .. })));
    }
}
