//! In-memory registry of active calls and their bound agent connections.
//!
//! The registry is constructed once at startup and shared by reference with
//! every handler. Call ids accumulate only until `end` removes them; the map
//! itself tolerates last-write-wins races since each entry is keyed by a
//! freshly generated call id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Live connection to an agent bound to a call. Pushes always replace the
/// agent's entire behavioral instruction text.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    async fn replace_instructions(&self, instructions: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct CallSession {
    pub call_id: String,
    pub agent_user_id: String,
    pub agent: Option<Arc<dyn AgentHandle>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// `create` rejects duplicate call ids rather than silently replacing
    /// the existing session (and its agent binding).
    AlreadyExists,
    NotFound,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyExists => write!(f, "call already registered"),
            SessionError::NotFound => write!(f, "call not found"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug)]
pub enum PushError {
    NotFound,
    NoAgent,
    Provider(anyhow::Error),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::NotFound => write!(f, "call not found"),
            PushError::NoAgent => write!(f, "call has no agent attached"),
            PushError::Provider(error) => write!(f, "agent instruction push failed: {error:#}"),
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, call_id: &str, agent_user_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(call_id) {
            return Err(SessionError::AlreadyExists);
        }
        sessions.insert(
            call_id.to_string(),
            CallSession {
                call_id: call_id.to_string(),
                agent_user_id: agent_user_id.to_string(),
                agent: None,
            },
        );
        Ok(())
    }

    pub async fn attach_agent(
        &self,
        call_id: &str,
        agent: Arc<dyn AgentHandle>,
        agent_user_id: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(call_id).ok_or(SessionError::NotFound)?;
        session.agent = Some(agent);
        session.agent_user_id = agent_user_id.to_string();
        Ok(())
    }

    pub async fn get(&self, call_id: &str) -> Option<CallSession> {
        let sessions = self.sessions.read().await;
        sessions.get(call_id).cloned()
    }

    /// Replaces the bound agent's instructions in full. The handle is cloned
    /// out of the lock first so a slow provider call never blocks the map.
    pub async fn push_instructions(
        &self,
        call_id: &str,
        instructions: &str,
    ) -> Result<(), PushError> {
        let agent = {
            let sessions = self.sessions.read().await;
            let session = sessions.get(call_id).ok_or(PushError::NotFound)?;
            session.agent.clone().ok_or(PushError::NoAgent)?
        };

        agent
            .replace_instructions(instructions)
            .await
            .map_err(PushError::Provider)
    }

    /// Explicit end-of-call lifecycle: drops the session and its agent
    /// binding. Returns `NotFound` for unknown ids.
    pub async fn end(&self, call_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(call_id)
            .map(|_| ())
            .ok_or(SessionError::NotFound)
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}
