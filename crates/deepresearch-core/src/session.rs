//! Session identity and memory-backed session management.

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MemorySettings;
use crate::memory::{ConversationTurn, DynConversationMemory, MemoryKey, TurnRole};

/// Context supplied by the hosting runtime alongside a request.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: Option<String>,
}

impl SessionContext {
    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

/// Resolve the session id for one request.
///
/// Precedence: non-empty context id, then the environment override, then a
/// fresh UUID v4. Call once per request and thread the result through.
pub fn resolve_session_id(context: Option<&SessionContext>, env_override: Option<&str>) -> String {
    if let Some(id) = context
        .and_then(|ctx| ctx.session_id.as_deref())
        .filter(|id| !id.trim().is_empty())
    {
        return id.to_string();
    }

    if let Some(id) = env_override.filter(|id| !id.trim().is_empty()) {
        return id.to_string();
    }

    Uuid::new_v4().to_string()
}

/// Directory name for a session's working files.
///
/// Ids made of ASCII alphanumerics, `-` and `_` are used verbatim; any other
/// byte is percent-encoded, so distinct ids never share a directory and the
/// name never contains a path separator or `..`.
pub fn session_dir_name(session_id: &str) -> String {
    let mut name = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    if name.is_empty() {
        name.push_str("%00");
    }
    name
}

/// Memory settings bound to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub memory_id: String,
    pub actor_id: String,
    pub session_id: String,
}

impl MemoryConfig {
    /// `None` unless memory is enabled and a memory id is configured.
    pub fn resolve(settings: &MemorySettings, session_id: &str) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let memory_id = settings.memory_id.clone()?;
        Some(Self {
            memory_id,
            actor_id: settings.actor_id.clone(),
            session_id: session_id.to_string(),
        })
    }

    fn key(&self) -> MemoryKey {
        MemoryKey {
            memory_id: self.memory_id.clone(),
            actor_id: self.actor_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// Session manager handed to the agent; persists conversation turns.
#[derive(Clone)]
pub struct SessionManager {
    config: MemoryConfig,
    store: DynConversationMemory,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: MemoryConfig, store: DynConversationMemory) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Previous turns for this session; memory failures degrade to no history.
    pub async fn history(&self, limit: usize) -> Vec<ConversationTurn> {
        match self.store.recent(&self.config.key(), limit).await {
            Ok(turns) => turns,
            Err(err) => {
                warn!(error = %err, session_id = %self.config.session_id, "failed to read session memory");
                Vec::new()
            }
        }
    }

    pub async fn record_exchange(&self, prompt: &str, response: &str) {
        let turns = vec![
            ConversationTurn::new(TurnRole::User, prompt),
            ConversationTurn::new(TurnRole::Assistant, response),
        ];
        if let Err(err) = self.store.append(&self.config.key(), turns).await {
            warn!(error = %err, session_id = %self.config.session_id, "failed to persist session memory");
        }
    }
}

/// Build a session manager when memory is enabled, otherwise `None`.
pub fn create_session_manager(
    settings: &MemorySettings,
    session_id: &str,
    store: DynConversationMemory,
) -> Option<SessionManager> {
    let Some(config) = MemoryConfig::resolve(settings, session_id) else {
        info!("session memory is disabled");
        return None;
    };

    info!(memory_id = %config.memory_id, actor_id = %config.actor_id, "creating session manager");
    Some(SessionManager::new(config, store))
}
