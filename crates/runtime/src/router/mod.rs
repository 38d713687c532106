//! Event Router
//!
//! Responsibilities:
//! - Subscribe to `ui.notify` on the event bus
//! - Pick a target node from hot-reloadable routing rules
//! - Print locally or relay the notification to the target node
//!
//! The active rule list is swapped as a whole; handlers always read one
//! consistent snapshot. Network failures are logged and dropped.

pub mod relay;
pub mod rules;

pub use relay::{HttpRelay, RelayTransport, TOKEN_HEADER};
pub use rules::{RoutingRule, RuleMatch, RuleTarget, THIS_NODE, load_rules, parse_rules};

use nodemesh_core::{Event, NodeConfig, NodeRole, UI_NOTIFY};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SubscriptionId};
use crate::directory::{DirectoryError, NodeDirectory};
use crate::io::SharedConsole;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid routing rule: {0}")]
    InvalidRule(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("No async runtime: {0}")]
    Runtime(String),

    #[error("Router state poisoned")]
    Poisoned,
}

/// What the router did with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No usable `payload.text`
    Ignored,
    Local,
    Relayed { node_id: String, base_url: String },
    /// Target node has no reachable address
    Unresolved { node_id: String },
    /// Address known but delivery failed
    Failed { node_id: String, error: String },
}

/// Router settings derived from node configuration
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub node_id: String,
    pub role: NodeRole,
    pub hub_url: Option<String>,
    pub token: String,
    pub rules_path: PathBuf,
    pub watch_interval: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            role: config.role,
            hub_url: config.hub_url.clone(),
            token: config.token.clone(),
            rules_path: config.rules_path(),
            watch_interval: config.router.watch_interval(),
        }
    }
}

struct WatchHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct RouterState {
    subscription: Option<SubscriptionId>,
    watcher: Option<WatchHandle>,
}

type RuleSnapshot = Arc<Vec<RoutingRule>>;

pub struct Router {
    settings: RouterSettings,
    bus: Arc<EventBus>,
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn RelayTransport>,
    console: SharedConsole,
    rules: Arc<watch::Sender<RuleSnapshot>>,
    state: Mutex<RouterState>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("node_id", &self.settings.node_id)
            .field("rules", &self.rules.borrow().len())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Router {
    pub fn new(
        settings: RouterSettings,
        bus: Arc<EventBus>,
        directory: Arc<NodeDirectory>,
        transport: Arc<dyn RelayTransport>,
        console: SharedConsole,
    ) -> Self {
        let (rules, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            settings,
            bus,
            directory,
            transport,
            console,
            rules: Arc::new(rules),
            state: Mutex::new(RouterState::default()),
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn is_started(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.subscription.is_some())
            .unwrap_or(false)
    }

    /// Current rule snapshot
    pub fn rules(&self) -> RuleSnapshot {
        self.rules.borrow().clone()
    }

    /// Replace the active rule list
    pub fn set_rules(&self, rules: Vec<RoutingRule>) {
        self.rules.send_replace(Arc::new(rules));
    }

    /// Re-read the rules file and swap it in. Returns the rule count.
    pub fn reload_rules(&self) -> Result<usize, RouterError> {
        let rules = load_rules(&self.settings.rules_path)?;
        let count = rules.len();
        self.set_rules(rules);
        debug!(path = %self.settings.rules_path.display(), rules = count, "routing rules loaded");
        Ok(count)
    }

    /// Subscribe to `ui.notify`, load rules and start watching the rules file.
    ///
    /// Calling it again on a started router does nothing.
    pub fn start(self: &Arc<Self>) -> Result<(), RouterError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| RouterError::Runtime(e.to_string()))?;
        let mut state = self.state.lock().map_err(|_| RouterError::Poisoned)?;
        if state.subscription.is_some() {
            return Ok(());
        }

        // Baseline taken before the load so writes racing with it are picked up
        let baseline = modified_at(&self.settings.rules_path);
        if let Err(e) = self.reload_rules() {
            warn!(error = %e, "routing rules unavailable, keeping previous list");
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let spawner = handle.clone();
        let subscription = self.bus.subscribe(UI_NOTIFY, move |event| {
            let Some(router) = weak.upgrade() else {
                return;
            };
            let event = event.clone();
            spawner.spawn(async move {
                router.on_event(&event).await;
            });
        });

        let (stop, stop_rx) = oneshot::channel();
        let task = handle.spawn(watch_rules(
            self.settings.rules_path.clone(),
            self.settings.watch_interval,
            baseline,
            Arc::clone(&self.rules),
            stop_rx,
        ));

        state.subscription = Some(subscription);
        state.watcher = Some(WatchHandle { stop, task });
        info!(node_id = %self.settings.node_id, role = %self.settings.role, "router started");
        Ok(())
    }

    /// Stop watching and unsubscribe. Safe to repeat or call before `start`.
    pub fn stop(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(watcher) = state.watcher.take() {
            if watcher.stop.send(()).is_err() {
                watcher.task.abort();
            }
        }
        if let Some(subscription) = state.subscription.take() {
            self.bus.unsubscribe(subscription);
            info!(node_id = %self.settings.node_id, "router stopped");
        }
    }

    /// Route one event
    pub async fn on_event(&self, event: &Event) -> RouteOutcome {
        let Some(text) = event.text() else {
            return RouteOutcome::Ignored;
        };

        let this_node = self.settings.node_id.as_str();
        let rules = self.rules();
        let target = rules
            .iter()
            .find(|rule| rule.accepts(event))
            .map(|rule| rule.resolve_target(this_node))
            .unwrap_or(this_node)
            .to_string();

        if target == this_node {
            let origin = (!event.source.is_empty()).then_some(event.source.as_str());
            self.console.print(this_node, text, origin);
            return RouteOutcome::Local;
        }

        let Some(base_url) = self.resolve_base_url(&target).await else {
            warn!(target_node = %target, "no reachable address for routing target");
            return RouteOutcome::Unresolved { node_id: target };
        };

        let body = json!({
            "text": text,
            "origin": { "source": event.source, "from": this_node },
        });
        match self
            .transport
            .post_print(&base_url, &body, &self.settings.token)
            .await
        {
            Ok(()) => {
                debug!(target_node = %target, base_url = %base_url, "notification relayed");
                RouteOutcome::Relayed {
                    node_id: target,
                    base_url,
                }
            }
            Err(e) => {
                warn!(target_node = %target, error = %e, "relay failed");
                RouteOutcome::Failed {
                    node_id: target,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Hubs ask the directory; members ask the hub. Any error means `None`.
    pub async fn resolve_base_url(&self, node_id: &str) -> Option<String> {
        match self.settings.role {
            NodeRole::Hub => {
                if !self.directory.is_online(node_id).await {
                    debug!(node_id = %node_id, "target offline");
                    return None;
                }
                match self.directory.base_url(node_id).await {
                    Ok(url) => url.filter(|u| !u.is_empty()),
                    Err(e) => {
                        debug!(node_id = %node_id, error = %e, "directory lookup failed");
                        None
                    }
                }
            }
            NodeRole::Member => {
                let hub_url = self.settings.hub_url.as_deref()?;
                match self
                    .transport
                    .lookup_base_url(hub_url, node_id, &self.settings.token)
                    .await
                {
                    Ok(url) => url,
                    Err(e) => {
                        debug!(node_id = %node_id, error = %e, "hub lookup failed");
                        None
                    }
                }
            }
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
    }
}

fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll the rules file and swap the list whenever its mtime differs from
/// `last_modified`, the mtime seen at the previous load
async fn watch_rules(
    path: PathBuf,
    interval: Duration,
    mut last_modified: Option<SystemTime>,
    rules: Arc<watch::Sender<RuleSnapshot>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let modified = modified_at(&path);
        if modified == last_modified {
            continue;
        }
        last_modified = modified;

        match load_rules(&path) {
            Ok(list) => {
                info!(path = %path.display(), rules = list.len(), "routing rules reloaded");
                rules.send_replace(Arc::new(list));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "rules reload failed, keeping previous list"),
        }
    }
    debug!(path = %path.display(), "rules watcher stopped");
}
