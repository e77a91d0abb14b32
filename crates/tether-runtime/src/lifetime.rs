//! Session lifetime manager
//!
//! Owns at most one live session. Each discovery event tears the current
//! session down completely (every entity unbound, transport released) before
//! a connection to the new port is attempted. Events that arrive while a
//! transition is in progress are coalesced: only the latest is acted upon.
//!
//! ```text
//! Idle --event--> Connecting --ok--> Active --event/closed--> TearingDown --> Idle
//!                     |                                                       ^
//!                     +--------------------- connect failed ------------------+
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::TetherResult;
use tether_model::Model;
use tether_transport::Connector;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::discovery::DiscoveryEvent;
use crate::dispatcher::Dispatcher;
use crate::session::{Session, SessionObserver};

const TRANSITION_BUFFER: usize = 64;

/// Link state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { port: u16 },
    Active { port: u16, generation: u64 },
    TearingDown { generation: u64 },
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, LinkState::Active { .. })
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => f.write_str("idle"),
            LinkState::Connecting { port } => write!(f, "connecting:{port}"),
            LinkState::Active { port, generation } => write!(f, "active:{port}#{generation}"),
            LinkState::TearingDown { generation } => write!(f, "tearing-down#{generation}"),
        }
    }
}

/// One state change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkTransition {
    pub from: LinkState,
    pub to: LinkState,
}

/// Builder for the manager task
pub struct LifetimeManager {
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    root_name: String,
    model: Arc<dyn Model>,
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl LifetimeManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
        root_name: impl Into<String>,
        model: Arc<dyn Model>,
    ) -> Self {
        LifetimeManager {
            connector,
            dispatcher,
            root_name: root_name.into(),
            model,
            observers: Vec::new(),
        }
    }

    /// Notify `observer` of every session start and end
    pub fn observe(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Start driving sessions from `discovery`
    pub fn spawn(self, discovery: watch::Receiver<Option<DiscoveryEvent>>) -> LinkHandle {
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let current = Arc::new(Mutex::new(None));

        let actor = Actor {
            manager: self,
            state: state_tx,
            transitions: transitions.clone(),
            current: current.clone(),
            generation: 0,
            active: None,
        };
        let task = tokio::spawn(actor.run(discovery, shutdown_rx));

        LinkHandle {
            state: state_rx,
            transitions,
            current,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running manager
pub struct LinkHandle {
    state: watch::Receiver<LinkState>,
    transitions: broadcast::Sender<LinkTransition>,
    current: Arc<Mutex<Option<Arc<Session>>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver that always holds the current state
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Every transition from now on
    pub fn transitions(&self) -> broadcast::Receiver<LinkTransition> {
        self.transitions.subscribe()
    }

    /// The live session, if any
    pub fn session(&self) -> Option<Arc<Session>> {
        self.current.lock().clone()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&LinkState) -> bool,
    ) -> TetherResult<LinkState> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| tether_core::TetherError::TransportClosed)?;
        Ok(*state)
    }

    /// Tear down the live session and stop the manager
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ActiveSession {
    session: Arc<Session>,
    closed: watch::Receiver<bool>,
}

struct Actor {
    manager: LifetimeManager,
    state: watch::Sender<LinkState>,
    transitions: broadcast::Sender<LinkTransition>,
    current: Arc<Mutex<Option<Arc<Session>>>>,
    generation: u64,
    active: Option<ActiveSession>,
}

impl Actor {
    async fn run(
        mut self,
        mut discovery: watch::Receiver<Option<DiscoveryEvent>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        // An event published before we started is still pending
        let pending = *discovery.borrow_and_update();
        if let Some(event) = pending {
            self.reconnect(event).await;
        }

        loop {
            tokio::select! {
                changed = discovery.changed() => {
                    if changed.is_err() {
                        tracing::debug!("discovery source gone");
                        break;
                    }
                    let latest = *discovery.borrow_and_update();
                    if let Some(event) = latest {
                        self.reconnect(event).await;
                    }
                }
                _ = wait_closed(&mut self.active) => {
                    tracing::info!("transport closed by peer");
                    self.teardown().await;
                }
                _ = &mut shutdown => break,
            }
        }

        self.teardown().await;
        tracing::debug!("lifetime manager stopped");
    }

    /// Transitions are broadcast before the state is visible, so a waiter
    /// on the state never sees it ahead of the transition log
    fn set_state(&self, to: LinkState) {
        let from = *self.state.borrow();
        if from == to {
            return;
        }
        tracing::info!(%from, %to, "link state");
        let _ = self.transitions.send(LinkTransition { from, to });
        self.state.send_replace(to);
    }

    async fn reconnect(&mut self, event: DiscoveryEvent) {
        self.teardown().await;

        let port = event.port;
        self.set_state(LinkState::Connecting { port });

        let transport = match self.manager.connector.connect(port).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(port, "connect failed: {}", e);
                self.set_state(LinkState::Idle);
                return;
            }
        };

        self.generation += 1;
        let established = Session::establish(
            self.generation,
            transport,
            &self.manager.dispatcher,
            &self.manager.root_name,
            self.manager.model.clone(),
            self.manager.observers.clone(),
        )
        .await;

        match established {
            Ok(session) => {
                let generation = session.generation();
                *self.current.lock() = Some(session.clone());
                self.active = Some(ActiveSession {
                    closed: session.closed(),
                    session,
                });
                self.set_state(LinkState::Active { port, generation });
            }
            Err(e) => {
                tracing::error!(port, "session not established: {}", e);
                self.set_state(LinkState::Idle);
            }
        }
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let generation = active.session.generation();
        self.set_state(LinkState::TearingDown { generation });

        self.current.lock().take();
        active
            .session
            .teardown(&self.manager.dispatcher, self.manager.observers.clone())
            .await;

        self.set_state(LinkState::Idle);
    }
}

async fn wait_closed(active: &mut Option<ActiveSession>) {
    match active {
        Some(active) => {
            let _ = active.closed.wait_for(|closed| *closed).await;
        }
        None => std::future::pending().await,
    }
}
