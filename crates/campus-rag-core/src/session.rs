//! Per-conversation session state.
//!
//! A [`Session`] is an append-only list of [`SessionTurn`]s. The only
//! mutation after the fact is attaching a [`Feedback`] signal to a turn.
//! Sessions live in process memory for the lifetime of the conversation;
//! [`SessionRegistry`] maps conversation ids to sessions and never shares
//! state between conversations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// Helpfulness signal a user attaches to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

/// Index of a turn within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cited_sources: Vec<SourceRef>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

impl SessionTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            cited_sources: Vec::new(),
            feedback: None,
        }
    }

    pub fn assistant(text: impl Into<String>, cited_sources: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            cited_sources,
            feedback: None,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Ordered history of one conversation.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<SessionTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_turn(&mut self, turn: SessionTurn) -> TurnId {
        self.turns.push(turn);
        TurnId(self.turns.len() - 1)
    }

    /// Append a question and its answer together.
    ///
    /// Returns the id of the assistant turn, the one feedback attaches to.
    pub fn append_exchange(&mut self, user: SessionTurn, assistant: SessionTurn) -> TurnId {
        self.turns.reserve(2);
        self.turns.push(user);
        self.append_turn(assistant)
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[SessionTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn record_feedback(&mut self, turn: TurnId, signal: Feedback) -> Result<()> {
        let target = self
            .turns
            .get_mut(turn.0)
            .ok_or_else(|| RagError::NotFound(format!("turn {} in session", turn.0)))?;
        target.feedback = Some(signal);
        Ok(())
    }

    /// Sources cited by the most recent assistant turn.
    pub fn last_sources(&self) -> &[SourceRef] {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.cited_sources.as_slice())
            .unwrap_or(&[])
    }

    /// Id of the most recent assistant turn.
    pub fn last_answer(&self) -> Option<TurnId> {
        self.turns
            .iter()
            .rposition(|t| t.role == Role::Assistant)
            .map(TurnId)
    }

    pub fn turns(&self) -> &[SessionTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Conversation id → [`Session`] map shared by all request handlers.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `conversation_id`, created empty on first use.
    pub fn get_or_create(&self, conversation_id: &str) -> Result<Arc<Mutex<Session>>> {
        if let Some(existing) = self.read()?.get(conversation_id) {
            return Ok(existing.clone());
        }
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| poisoned("session registry"))?;
        Ok(sessions
            .entry(conversation_id.to_string())
            .or_default()
            .clone())
    }

    /// Run `f` with exclusive access to a conversation's session.
    pub fn with_session<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R> {
        let session = self.get_or_create(conversation_id)?;
        let mut guard = lock(&session)?;
        Ok(f(&mut *guard))
    }

    /// Copy of the last `n` turns of a conversation.
    pub fn recent(&self, conversation_id: &str, n: usize) -> Result<Vec<SessionTurn>> {
        self.with_session(conversation_id, |s| s.recent(n).to_vec())
    }

    /// Drop a conversation's history. Returns whether it existed.
    pub fn reset(&self, conversation_id: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| poisoned("session registry"))?;
        Ok(sessions.remove(conversation_id).is_some())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mutex<Session>>>>> {
        self.sessions
            .read()
            .map_err(|_| poisoned("session registry"))
    }
}

fn lock(session: &Mutex<Session>) -> Result<MutexGuard<'_, Session>> {
    session.lock().map_err(|_| poisoned("session"))
}

fn poisoned(what: &str) -> RagError {
    RagError::Other(anyhow::anyhow!("{} lock poisoned", what))
}
