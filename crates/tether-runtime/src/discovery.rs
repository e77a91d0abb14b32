//! Endpoint discovery
//!
//! The editor side writes its listening port into a small JSON file; the tool
//! side watches that file and emits a [`DiscoveryEvent`] each time it settles
//! on a readable port. Events are published through a `watch` channel, so a
//! slow consumer only ever sees the most recent one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tether_core::{TetherError, TetherResult};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{TetherConfig, WatchMode};

/// Content of the discovery file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    #[serde(alias = "port_id")]
    pub port: u16,
}

impl DiscoveryRecord {
    pub fn parse(text: &str) -> TetherResult<Self> {
        serde_json::from_str(text).map_err(|e| TetherError::InvalidWireFormat(e.to_string()))
    }

    pub async fn load(path: &Path) -> TetherResult<Self> {
        let unreadable = |reason: String| TetherError::DiscoveryUnreadable {
            path: path.display().to_string(),
            reason,
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        Self::parse(&text).map_err(|e| unreadable(e.to_string()))
    }

    /// Write through a temporary sibling and rename it into place, so
    /// readers never observe a partially written record
    pub fn write_atomic(&self, path: &Path) -> TetherResult<()> {
        let failed = |reason: String| TetherError::DiscoveryUnreadable {
            path: path.display().to_string(),
            reason,
        };
        let text = serde_json::to_string(self).map_err(|e| failed(e.to_string()))?;

        let mut tmp_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| failed("path has no file name".into()))?;
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        std::fs::write(&tmp, text).map_err(|e| failed(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| failed(e.to_string()))
    }
}

/// A readable discovery record was observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub port: u16,
    /// Increments with every emitted event, including repeats of a port
    pub sequence: u64,
}

/// Watches the discovery file and publishes events
pub struct DiscoveryWatcher {
    events: watch::Receiver<Option<DiscoveryEvent>>,
    task: JoinHandle<()>,
    _watcher: Box<dyn Watcher + Send>,
}

impl DiscoveryWatcher {
    /// Start watching with the paths and timings from `config`
    pub fn start(config: &TetherConfig) -> TetherResult<Self> {
        Self::spawn(
            config.discovery_path.clone(),
            config.watch_mode,
            config.debounce,
            config.poll_interval,
        )
    }

    /// Start watching `path`. Its parent directory is created if missing.
    pub fn spawn(
        path: PathBuf,
        mode: WatchMode,
        debounce: Duration,
        poll_interval: Duration,
    ) -> TetherResult<Self> {
        let unreadable = |reason: String| TetherError::DiscoveryUnreadable {
            path: path.display().to_string(),
            reason,
        };
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| unreadable("path has no file name".into()))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| unreadable(e.to_string()))?;

        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &file_name) {
                    let _ = ping_tx.send(());
                }
            }
            Err(e) => tracing::warn!("discovery watcher error: {}", e),
        };

        let mut watcher = create_watcher(mode, poll_interval, handler)
            .map_err(|e| unreadable(e.to_string()))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| unreadable(e.to_string()))?;
        tracing::info!(path = %path.display(), ?mode, "watching discovery file");

        let (events_tx, events) = watch::channel(None);
        let task = tokio::spawn(debounce_loop(path, ping_rx, events_tx, debounce));

        Ok(DiscoveryWatcher {
            events,
            task,
            _watcher: watcher,
        })
    }

    /// Receiver of the latest event; `None` until the first one
    pub fn events(&self) -> watch::Receiver<Option<DiscoveryEvent>> {
        self.events.clone()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for DiscoveryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryWatcher")
            .field("latest", &*self.events.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for DiscoveryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn create_watcher<F>(
    mode: WatchMode,
    poll_interval: Duration,
    handler: F,
) -> notify::Result<Box<dyn Watcher + Send>>
where
    F: Fn(notify::Result<Event>) + Clone + Send + 'static,
{
    let poll = |handler: F| -> notify::Result<Box<dyn Watcher + Send>> {
        let config = notify::Config::default().with_poll_interval(poll_interval);
        Ok(Box::new(PollWatcher::new(handler, config)?))
    };

    match mode {
        WatchMode::Poll => poll(handler),
        WatchMode::Native => match notify::recommended_watcher(handler.clone()) {
            Ok(watcher) => Ok(Box::new(watcher)),
            Err(e) => {
                tracing::warn!("native file watching unavailable, polling instead: {}", e);
                poll(handler)
            }
        },
    }
}

/// Writes and renames that land on the watched file name
fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let mutating = match event.kind {
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => true,
        _ => false,
    };
    mutating
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

async fn debounce_loop(
    path: PathBuf,
    mut pings: mpsc::UnboundedReceiver<()>,
    events: watch::Sender<Option<DiscoveryEvent>>,
    debounce: Duration,
) {
    let mut sequence = 0;

    // A record written before we started still counts
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        emit(&path, &events, &mut sequence).await;
    }

    while pings.recv().await.is_some() {
        // Wait for the writer to go quiet
        loop {
            match tokio::time::timeout(debounce, pings.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        emit(&path, &events, &mut sequence).await;
    }
}

async fn emit(
    path: &Path,
    events: &watch::Sender<Option<DiscoveryEvent>>,
    sequence: &mut u64,
) {
    match DiscoveryRecord::load(path).await {
        Ok(record) => {
            *sequence += 1;
            tracing::info!(port = record.port, sequence = *sequence, "discovered endpoint");
            events.send_replace(Some(DiscoveryEvent {
                port: record.port,
                sequence: *sequence,
            }));
        }
        Err(e) => tracing::warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accepts_both_field_names() {
        assert_eq!(
            DiscoveryRecord::parse(r#"{"port": 5555}"#).unwrap().port,
            5555
        );
        assert_eq!(
            DiscoveryRecord::parse(r#"{"port_id": 5556, "extra": true}"#)
                .unwrap()
                .port,
            5556
        );
        assert!(DiscoveryRecord::parse(r#"{"port": "x"}"#).is_err());
        assert!(DiscoveryRecord::parse("").is_err());
    }

    #[test]
    fn test_relevance_filter() {
        use notify::event::{AccessKind, CreateKind, DataChange};

        let name = OsString::from("ProtocolInstance.json");
        let target = PathBuf::from("/project/Library/ProtocolInstance.json");

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(target.clone());
        assert!(is_relevant(&write, &name));

        let renamed_in = Event::new(EventKind::Modify(ModifyKind::Name(
            notify::event::RenameMode::To,
        )))
        .add_path(target.clone());
        assert!(is_relevant(&renamed_in, &name));

        let temp = Event::new(EventKind::Create(CreateKind::File))
            .add_path(target.with_file_name("ProtocolInstance.json.tmp"));
        assert!(!is_relevant(&temp, &name));

        let read = Event::new(EventKind::Access(AccessKind::Read)).add_path(target);
        assert!(!is_relevant(&read, &name));
    }

    #[tokio::test]
    async fn test_write_atomic_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Library").join("ProtocolInstance.json");

        DiscoveryRecord { port: 40123 }.write_atomic(&path).unwrap();
        assert_eq!(DiscoveryRecord::load(&path).await.unwrap().port, 40123);
        assert!(!path.with_file_name("ProtocolInstance.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiscoveryRecord::load(&dir.path().join("none.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::DiscoveryUnreadable { .. }));
    }

    async fn next_event(
        rx: &mut watch::Receiver<Option<DiscoveryEvent>>,
    ) -> Option<DiscoveryEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .ok()?
            .ok()?;
        *rx.borrow_and_update()
    }

    #[tokio::test]
    async fn test_eager_event_for_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ProtocolInstance.json");
        DiscoveryRecord { port: 7001 }.write_atomic(&path).unwrap();

        let watcher = DiscoveryWatcher::spawn(
            path,
            WatchMode::Native,
            Duration::from_millis(20),
            Duration::from_millis(50),
        )
        .unwrap();
        let mut rx = watcher.events();
        let event = next_event(&mut rx).await.unwrap();
        assert_eq!(event.port, 7001);
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn test_change_and_malformed_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ProtocolInstance.json");

        let watcher = DiscoveryWatcher::spawn(
            path.clone(),
            WatchMode::Poll,
            Duration::from_millis(20),
            Duration::from_millis(25),
        )
        .unwrap();
        let mut rx = watcher.events();

        // Absent file: nothing
        assert!(tokio::time::timeout(Duration::from_millis(150), rx.changed())
            .await
            .is_err());

        DiscoveryRecord { port: 7002 }.write_atomic(&path).unwrap();
        assert_eq!(next_event(&mut rx).await.unwrap().port, 7002);

        // Garbage is logged and skipped
        std::fs::write(&path, "{ not json").unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), rx.changed())
            .await
            .is_err());
        let latest = *rx.borrow();
        assert_eq!(latest.map(|e| e.port), Some(7002));
    }
}
