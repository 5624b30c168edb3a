//! Session registry: connects configured tool servers and aggregates their tools.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use mcp::{ServerConfig, Session, Tool};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::capability::Capability;
use crate::toolset::CapabilitySet;
use crate::Result;

/// Timeouts applied while building and using a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolOptions {
    /// Handshake timeout per tool server.
    pub startup_timeout: Duration,
    /// Bridge deadline for a single tool invocation.
    pub call_timeout: Duration,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns every session it connected for as long as it lives.
///
/// There is no way to remove or close a session: capabilities only hold weak
/// references, so a session dropped early would silently break its tools.
/// A session that breaks later stays registered and its tools report the
/// failure on each call.
pub struct SessionRegistry {
    sessions: Vec<Arc<Session>>,
    capabilities: CapabilitySet,
}

impl SessionRegistry {
    /// Connect every enabled server and adapt the tools it reports.
    ///
    /// Servers that fail to spawn, handshake or list their tools are logged
    /// and skipped. A repeated server name keeps the first definition.
    pub fn build(servers: &[ServerConfig], bridge: &Arc<Bridge>, options: ToolOptions) -> Self {
        let started = Instant::now();
        let mut sessions = Vec::new();
        let mut capabilities = Vec::new();
        let mut seen = HashSet::new();

        for config in servers {
            if !config.enabled {
                debug!(server = %config.name, "tool server disabled");
                continue;
            }
            if !seen.insert(config.name.as_str()) {
                warn!(server = %config.name, "duplicate tool server name, skipping");
                continue;
            }

            match connect_server(config, bridge, options, &mut sessions) {
                Ok((session, tools)) => {
                    info!(server = %config.name, tools = tools.len(), "connected to tool server");
                    capabilities.extend(tools.into_iter().map(|tool| {
                        Arc::new(Capability::new(
                            tool,
                            &session,
                            Arc::clone(bridge),
                            options.call_timeout,
                        ))
                    }));
                }
                Err(e) => {
                    warn!(
                        server = %config.name,
                        error = %e,
                        "failed to connect tool server, skipping"
                    );
                }
            }
        }

        let capabilities = CapabilitySet::new(capabilities);
        info!(
            servers = sessions.len(),
            tools = capabilities.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool registry built"
        );

        Self {
            sessions,
            capabilities,
        }
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn session(&self, name: &str) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

/// Connect one server and list its tools on the bridge runtime.
///
/// A session that completes the handshake is registered even if listing then
/// fails, so it is never dropped once established.
fn connect_server(
    config: &ServerConfig,
    bridge: &Bridge,
    options: ToolOptions,
    sessions: &mut Vec<Arc<Session>>,
) -> Result<(Arc<Session>, Vec<Tool>)> {
    // Spawning happens before the handshake clock starts.
    let deadline = options.startup_timeout + Duration::from_secs(5);

    let connect = Session::connect(config.clone(), options.startup_timeout);
    let session = bridge.call(deadline, connect)??;
    sessions.push(Arc::clone(&session));

    let listing = Arc::clone(&session);
    let tools = bridge.call(deadline, async move { listing.list_tools().await })??;
    Ok((session, tools))
}

/// Hands out capability sets, either from one shared registry or from a
/// fresh registry per call.
pub struct ToolProvider {
    servers: Vec<ServerConfig>,
    bridge: Arc<Bridge>,
    options: ToolOptions,
    cache: bool,
    shared: OnceLock<Arc<SessionRegistry>>,
    // Per-call registries are kept for the process lifetime.
    retained: Mutex<Vec<Arc<SessionRegistry>>>,
}

impl ToolProvider {
    pub fn new(
        servers: Vec<ServerConfig>,
        bridge: Arc<Bridge>,
        options: ToolOptions,
        cache: bool,
    ) -> Self {
        Self {
            servers,
            bridge,
            options,
            cache,
            shared: OnceLock::new(),
            retained: Mutex::new(Vec::new()),
        }
    }

    /// Blocks while connecting servers. Call from a blocking context.
    pub fn capabilities(&self) -> CapabilitySet {
        if self.cache {
            return self
                .shared
                .get_or_init(|| Arc::new(self.build()))
                .capabilities()
                .clone();
        }

        let registry = Arc::new(self.build());
        let capabilities = registry.capabilities().clone();
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registry);
        capabilities
    }

    /// Number of registries built so far.
    pub fn registries_built(&self) -> usize {
        let shared = usize::from(self.shared.get().is_some());
        let retained = self
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        shared + retained
    }

    pub fn is_cached(&self) -> bool {
        self.cache
    }

    fn build(&self) -> SessionRegistry {
        SessionRegistry::build(&self.servers, &self.bridge, self.options)
    }
}
