//! Editor side of the link
//!
//! Listens on an ephemeral loopback port, advertises it through the
//! discovery file and serves one tool connection at a time.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tether_core::TetherResult;
use tether_transport::TcpFrameListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::TetherConfig;
use crate::discovery::DiscoveryRecord;
use crate::dispatcher::Dispatcher;
use crate::editor::{EditorModel, LogEvent, OpenFileArgs, EDITOR_MODEL_ROOT};
use crate::session::Session;

/// Identity the editor publishes to the tool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditorInfo {
    pub plugin_version: String,
    pub application_path: String,
    pub application_version: String,
}

pub struct EditorEndpoint {
    port: u16,
    discovery_path: PathBuf,
    probe_timeout: Duration,
    call_timeout: Duration,
    model: Arc<EditorModel>,
    current: watch::Receiver<Option<Arc<Session>>>,
    accept_task: Option<JoinHandle<()>>,
    dispatcher: Dispatcher,
}

impl EditorEndpoint {
    /// Bind the listener, publish `info` and write the discovery record
    pub async fn start(
        config: &TetherConfig,
        dispatcher: Dispatcher,
        info: EditorInfo,
    ) -> TetherResult<Self> {
        let listener = TcpFrameListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        let port = listener.local_addr().port();

        let model = Arc::new(EditorModel::new());
        model.plugin_version.set(info.plugin_version)?;
        model.application_path.set(info.application_path)?;
        model.application_version.set(info.application_version)?;
        model.tool_process_id.advise_changes(|pid: &i32| {
            tracing::info!(pid, "tool process attached");
        });

        let (current_tx, current) = watch::channel(None);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            model.clone(),
            dispatcher.clone(),
            current_tx,
        ));

        // The listener is already accepting once the record becomes visible
        DiscoveryRecord { port }.write_atomic(&config.discovery_path)?;
        tracing::info!(port, path = %config.discovery_path.display(), "editor endpoint listening");

        Ok(EditorEndpoint {
            port,
            discovery_path: config.discovery_path.clone(),
            probe_timeout: config.probe_timeout,
            call_timeout: config.call_timeout,
            model,
            current,
            accept_task: Some(accept_task),
            dispatcher,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn model(&self) -> &Arc<EditorModel> {
        &self.model
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.current.borrow().clone()
    }

    /// Wait until a tool is connected, or give up after `timeout`
    pub async fn wait_for_session(&self, timeout: Duration) -> Option<Arc<Session>> {
        let mut current = self.current.clone();
        let waited = tokio::time::timeout(timeout, current.wait_for(|s| s.is_some())).await;
        match waited {
            Ok(Ok(session)) => session.clone(),
            _ => None,
        }
    }

    /// Forward one console entry to the tool
    pub fn log(&self, event: LogEvent) -> TetherResult<()> {
        self.model.log_model.log.fire(event)
    }

    /// Ask the tool to open a file. The tool is probed first so an absent
    /// tool fails within the probe timeout rather than the call timeout.
    pub async fn open_file(&self, args: OpenFileArgs) -> TetherResult<bool> {
        if !self
            .model
            .is_client_connected
            .start((), self.probe_timeout)
            .await?
        {
            return Ok(false);
        }
        self.model
            .open_file_line_col
            .start(args, self.call_timeout)
            .await
    }

    /// Blocking form of [`open_file`](Self::open_file). Must not run on the
    /// dispatcher, which delivers the responses.
    pub fn open_file_blocking(&self, args: OpenFileArgs) -> TetherResult<bool> {
        if !self.model.is_client_connected.sync((), self.probe_timeout)? {
            return Ok(false);
        }
        self.model.open_file_line_col.sync(args, self.call_timeout)
    }

    /// Stop accepting, tear the current session down and remove the
    /// discovery record
    pub async fn shutdown(mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }
        let session = self.current.borrow().clone();
        if let Some(session) = session {
            session.teardown(&self.dispatcher, Vec::new()).await;
        }
        if let Err(e) = std::fs::remove_file(&self.discovery_path) {
            tracing::debug!(path = %self.discovery_path.display(), "discovery record not removed: {}", e);
        }
        tracing::info!(port = self.port, "editor endpoint stopped");
    }
}

impl Drop for EditorEndpoint {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for EditorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorEndpoint")
            .field("port", &self.port)
            .field("discovery_path", &self.discovery_path)
            .field("connected", &self.current.borrow().is_some())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpFrameListener,
    model: Arc<EditorModel>,
    dispatcher: Dispatcher,
    current: watch::Sender<Option<Arc<Session>>>,
) {
    let mut generation = 0u64;
    let mut active: Option<Arc<Session>> = None;

    loop {
        let closed = active.as_ref().map(|s| s.closed());
        let peer_gone = async move {
            match closed {
                Some(mut rx) => {
                    let _ = rx.wait_for(|closed| *closed).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            accepted = listener.accept() => {
                let transport = match accepted {
                    Ok(transport) => transport,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                // Only one tool at a time; the newcomer wins
                if let Some(previous) = active.take() {
                    previous.teardown(&dispatcher, Vec::new()).await;
                    current.send_replace(None);
                }

                generation += 1;
                match Session::establish(
                    generation,
                    transport,
                    &dispatcher,
                    EDITOR_MODEL_ROOT,
                    model.clone(),
                    Vec::new(),
                )
                .await
                {
                    Ok(session) => {
                        active = Some(session.clone());
                        current.send_replace(Some(session));
                    }
                    Err(e) => tracing::warn!(generation, "tool session not established: {}", e),
                }
            }
            _ = peer_gone => {
                if let Some(previous) = active.take() {
                    tracing::info!(generation = previous.generation(), "tool disconnected");
                    previous.teardown(&dispatcher, Vec::new()).await;
                    current.send_replace(None);
                }
            }
        }
    }
}
