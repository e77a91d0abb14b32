//! Tool side of the link
//!
//! The tool discovers the editor through the discovery file, keeps one
//! session alive through the lifetime manager, answers the editor's calls and
//! mirrors a few entities into the flat map for frontends that only poll
//! keys.

use std::sync::Arc;

use tether_bridge::{DataBridge, FlatMap};
use tether_core::{TetherError, TetherResult};
use tether_model::Call;
use tether_transport::{Connector, TcpConnector};
use tokio::runtime::Handle;

use crate::config::TetherConfig;
use crate::discovery::DiscoveryWatcher;
use crate::dispatcher::Dispatcher;
use crate::editor::{EditorModel, LogEvent, LogEventType, OpenFileArgs, EDITOR_MODEL_ROOT};
use crate::lifetime::{LifetimeManager, LinkHandle};
use crate::session::{Session, SessionObserver};

/// What the tool does when the editor asks for something visible
pub trait EditorActions: Send + Sync {
    /// Open `args.path`, placing the caret when a line or column is given.
    /// Returns false when nothing could be opened.
    fn open_file(&self, args: &OpenFileArgs) -> bool;
}

pub struct ToolController {
    config: TetherConfig,
    model: Arc<EditorModel>,
    bridge: DataBridge,
    dispatcher: Dispatcher,
}

impl ToolController {
    /// Wire the model to `map` and install the call handlers. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: TetherConfig,
        map: FlatMap,
        dispatcher: Dispatcher,
        actions: Arc<dyn EditorActions>,
    ) -> TetherResult<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| TetherError::Config(format!("tool controller needs a runtime: {e}")))?;
        let model = Arc::new(EditorModel::new());
        let bridge = DataBridge::new(map);
        let keys = &config.bridge_keys;

        bridge.bind_property(&keys.play, &model.play);
        bridge.bind_property(&keys.pause, &model.pause);
        bridge.bind_trigger(
            &keys.step,
            spawn_call(runtime.clone(), model.step.clone(), config.call_timeout, "step"),
        );
        bridge.bind_trigger(
            &keys.refresh,
            spawn_call(runtime, model.refresh.clone(), config.call_timeout, "refresh"),
        );
        bridge.bind_signal(&keys.log_entry, &model.log_model.log, |event: &LogEvent| {
            serde_json::to_string(event).ok()
        });

        model.log_model.log.advise(|event: &LogEvent| match event.kind {
            LogEventType::Error => tracing::debug!(mode = ?event.mode, "editor error: {}", event.message),
            LogEventType::Warning => tracing::debug!(mode = ?event.mode, "editor warning: {}", event.message),
            LogEventType::Message => tracing::trace!(mode = ?event.mode, "editor: {}", event.message),
        });

        let expected = config.protocol_version.clone();
        model.plugin_version.advise_changes(move |version: &String| {
            if *version != expected {
                tracing::warn!(editor = %version, tool = %expected, "plugin version differs");
            }
        });

        model.is_client_connected.set_handler(|()| true);

        let weak = bridge.downgrade();
        let activate = keys.activate.clone();
        model.open_file_line_col.set_handler(move |args: OpenFileArgs| {
            let opened = actions.open_file(&args);
            if opened {
                if let Some(bridge) = weak.upgrade() {
                    bridge.publish(&activate, "true");
                }
            }
            opened
        });

        Ok(Arc::new(ToolController {
            config,
            model,
            bridge,
            dispatcher,
        }))
    }

    pub fn model(&self) -> &Arc<EditorModel> {
        &self.model
    }

    pub fn bridge(&self) -> &DataBridge {
        &self.bridge
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Write a flat-map key on behalf of an external frontend
    pub fn set_external(&self, key: &str, value: &str) -> TetherResult<()> {
        let map = self.bridge.map().clone();
        let key = key.to_string();
        let value = value.to_string();
        self.dispatcher.post(move || {
            map.set(&key, value);
        })
    }

    /// A lifetime manager binding this controller's model through `connector`
    pub fn manager(self: &Arc<Self>, connector: Arc<dyn Connector>) -> LifetimeManager {
        LifetimeManager::new(
            connector,
            self.dispatcher.clone(),
            EDITOR_MODEL_ROOT,
            self.model.clone(),
        )
        .observe(self.clone())
    }

    /// Watch the discovery file and connect over TCP
    pub fn start(self: &Arc<Self>) -> TetherResult<ToolLink> {
        let watcher = DiscoveryWatcher::start(&self.config)?;
        let connector = Arc::new(TcpConnector::new(self.config.connect_timeout));
        let link = self.manager(connector).spawn(watcher.events());
        Ok(ToolLink { watcher, link })
    }
}

impl SessionObserver for ToolController {
    fn session_started(&self, session: &Arc<Session>) {
        if let Err(e) = self.model.tool_process_id.set(std::process::id() as i32) {
            tracing::debug!("process id not sent: {}", e);
        }
        self.bridge
            .publish(&self.config.bridge_keys.session_initialized, "true");
        tracing::info!(generation = session.generation(), peer = session.peer(), "tool session initialized");
    }

    fn session_ended(&self, generation: u64) {
        tracing::debug!(generation, "tool session ended");
    }
}

impl std::fmt::Debug for ToolController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolController")
            .field("discovery_path", &self.config.discovery_path)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

/// Running discovery watcher plus lifetime manager
pub struct ToolLink {
    pub watcher: DiscoveryWatcher,
    pub link: LinkHandle,
}

impl ToolLink {
    pub async fn shutdown(self) {
        self.link.shutdown().await;
        self.watcher.stop();
    }
}

fn spawn_call(
    runtime: Handle,
    call: Call<(), ()>,
    timeout: std::time::Duration,
    name: &'static str,
) -> impl Fn() + Send + Sync + 'static {
    move || {
        let call = call.clone();
        runtime.spawn(async move {
            match call.start((), timeout).await {
                Ok(()) => tracing::debug!(call = name, "bridged call completed"),
                Err(e) => tracing::warn!(call = name, "bridged call failed: {}", e),
            }
        });
    }
}
