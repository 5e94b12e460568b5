//! Conversation service: one user turn in, one reply out.
//!
//! Each turn runs condense → preprocess → retrieve → assemble → generate.
//! Turns of one conversation are serialized by a per-conversation lock;
//! different conversations proceed concurrently and share only the index.
//! The user and assistant turns are appended together, and only when the
//! turn produced an answer or a "no evidence" reply. A failed turn leaves
//! the session untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use campus_rag_core::context::{ContextAssembler, ContextBundle};
use campus_rag_core::models::{QueryVariant, SourceRef};
use campus_rag_core::preprocess::{QueryPreprocessor, SynonymMap, Translator};
use campus_rag_core::search::HybridRetriever;
use campus_rag_core::session::{Feedback, SessionRegistry, SessionTurn, TurnId};
use campus_rag_core::{RagError, Result};

use crate::generation::{
    answer_prompt, condense_prompt, Generator, CONDENSE_INSTRUCTION, ANSWER_INSTRUCTION,
    FAILURE_REPLY, NO_EVIDENCE_REPLY,
};
use crate::storage::DocumentSource;

/// A cited source as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationLink {
    pub number: usize,
    pub title: String,
    pub file_name: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer {
        text: String,
        citations: Vec<CitationLink>,
        turn: TurnId,
    },
    NoEvidence {
        text: String,
        turn: TurnId,
    },
    /// The turn failed; nothing was recorded.
    Failed {
        text: String,
    },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer { text, .. } | Reply::NoEvidence { text, .. } | Reply::Failed { text } => text,
        }
    }

    /// The assistant turn to attach feedback to.
    pub fn turn(&self) -> Option<TurnId> {
        match self {
            Reply::Answer { turn, .. } | Reply::NoEvidence { turn, .. } => Some(*turn),
            Reply::Failed { .. } => None,
        }
    }

    /// Reply text followed by a numbered source list.
    pub fn render(&self) -> String {
        let Reply::Answer { text, citations, .. } = self else {
            return self.text().to_string();
        };
        if citations.is_empty() {
            return text.clone();
        }
        let mut out = format!("{}\n\nSources:", text);
        for c in citations {
            out.push_str(&format!("\n[{}] {} ({})", c.number, c.title, c.file_name));
            if let Some(link) = &c.link {
                out.push_str(&format!(" {}", link));
            }
        }
        out
    }
}

/// Tunables for [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub k: usize,
    pub token_budget: usize,
    pub history_turns: usize,
    pub corpus_language: String,
    pub synonyms: SynonymMap,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    pub condense: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            k: 5,
            token_budget: 8000,
            history_turns: 6,
            corpus_language: "ru".to_string(),
            synonyms: SynonymMap::default(),
            condense: true,
        }
    }
}

enum Outcome {
    Answer {
        text: String,
        bundle: ContextBundle,
    },
    NoEvidence,
}

pub struct ChatService {
    sessions: SessionRegistry,
    retriever: HybridRetriever,
    generator: Arc<dyn Generator>,
    translator: Option<Arc<dyn Translator>>,
    links: Option<Arc<dyn DocumentSource>>,
    settings: ChatSettings,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatService {
    pub fn new(retriever: HybridRetriever, generator: Arc<dyn Generator>, settings: ChatSettings) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            retriever,
            generator,
            translator: None,
            links: None,
            settings,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Render citation links through `source` (presigned URLs for S3).
    pub fn with_links(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.links = Some(source);
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Answer one user turn.
    ///
    /// Never returns an error for collaborator failures: those become
    /// [`Reply::Failed`]. Only a broken session store surfaces as `Err`.
    pub async fn ask(&self, conversation_id: &str, question: &str) -> Result<Reply> {
        let lock = self.turn_lock(conversation_id)?;
        let _turn = lock.lock().await;

        let history = self
            .sessions
            .recent(conversation_id, self.settings.history_turns)?;

        let (variant, outcome) = match self.answer(&history, question).await {
            Ok(result) => result,
            Err(e) => {
                warn!(conversation = conversation_id, error = %e, "turn failed");
                return Ok(Reply::Failed {
                    text: FAILURE_REPLY.to_string(),
                });
            }
        };

        let reply = match outcome {
            Outcome::Answer { text, bundle } => {
                let sources = bundle.sources();
                let turn = self.sessions.with_session(conversation_id, |s| {
                    s.append_exchange(
                        SessionTurn::user(question),
                        SessionTurn::assistant(text.clone(), sources.clone()),
                    )
                })?;
                self.log_interaction(conversation_id, question, &variant, &sources);
                Reply::Answer {
                    citations: self.citation_links(&sources),
                    text,
                    turn,
                }
            }
            Outcome::NoEvidence => {
                let turn = self.sessions.with_session(conversation_id, |s| {
                    s.append_exchange(
                        SessionTurn::user(question),
                        SessionTurn::assistant(NO_EVIDENCE_REPLY, Vec::new()),
                    )
                })?;
                self.log_interaction(conversation_id, question, &variant, &[]);
                Reply::NoEvidence {
                    text: NO_EVIDENCE_REPLY.to_string(),
                    turn,
                }
            }
        };
        Ok(reply)
    }

    /// Attach a helpfulness signal to an assistant turn.
    pub fn feedback(&self, conversation_id: &str, turn: TurnId, signal: Feedback) -> Result<()> {
        self.sessions
            .with_session(conversation_id, |s| s.record_feedback(turn, signal))??;
        info!(conversation = conversation_id, turn = turn.0, feedback = ?signal, "feedback recorded");
        Ok(())
    }

    /// Attach a signal to the latest answer of a conversation.
    pub fn feedback_last(&self, conversation_id: &str, signal: Feedback) -> Result<TurnId> {
        let turn = self
            .sessions
            .with_session(conversation_id, |s| s.last_answer())?
            .ok_or_else(|| RagError::NotFound(format!("no answer yet in {}", conversation_id)))?;
        self.feedback(conversation_id, turn, signal)?;
        Ok(turn)
    }

    /// Forget a conversation's history.
    pub fn reset(&self, conversation_id: &str) -> Result<bool> {
        let existed = self.sessions.reset(conversation_id)?;
        self.release_turn_lock(conversation_id)?;
        info!(conversation = conversation_id, existed, "session reset");
        Ok(existed)
    }

    async fn answer(&self, history: &[SessionTurn], question: &str) -> Result<(QueryVariant, Outcome)> {
        let standalone = self.standalone_question(history, question).await;

        let mut preprocessor = QueryPreprocessor::new(&self.settings.corpus_language)
            .with_synonym_map(&self.settings.synonyms);
        if let Some(translator) = &self.translator {
            preprocessor = preprocessor.with_translator(translator.as_ref());
        }
        let variant = preprocessor.preprocess(&standalone, None).await;

        let passages = self.retriever.retrieve(&variant, self.settings.k).await?;
        if passages.is_empty() {
            return Ok((variant, Outcome::NoEvidence));
        }

        let assembler = ContextAssembler::new(self.settings.history_turns);
        let bundle = assembler.assemble(&passages, history, self.settings.token_budget);
        if bundle.has_no_evidence() {
            return Ok((variant, Outcome::NoEvidence));
        }
        debug!(
            passages = bundle.passages.len(),
            chars = bundle.text_len(),
            "context assembled"
        );

        let text = self
            .generator
            .complete(ANSWER_INSTRUCTION, &answer_prompt(&bundle, question))
            .await?;
        Ok((variant, Outcome::Answer { text, bundle }))
    }

    /// Best effort: falls back to the question as asked.
    async fn standalone_question(&self, history: &[SessionTurn], question: &str) -> String {
        if !self.settings.condense || history.is_empty() {
            return question.to_string();
        }
        let rendered = ContextBundle {
            history: history.to_vec(),
            ..Default::default()
        }
        .render_history();
        match self
            .generator
            .complete(CONDENSE_INSTRUCTION, &condense_prompt(&rendered, question))
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                warn!(error = %e, "question condensing failed, using question as asked");
                question.to_string()
            }
        }
    }

    fn citation_links(&self, sources: &[SourceRef]) -> Vec<CitationLink> {
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| CitationLink {
                number: i + 1,
                title: s.title.clone().unwrap_or_else(|| s.file_name().to_string()),
                file_name: s.file_name().to_string(),
                link: self.links.as_ref().and_then(|l| l.link(&s.source_id)),
            })
            .collect()
    }

    fn turn_lock(&self, conversation_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .turn_locks
            .lock()
            .map_err(|_| RagError::Other(anyhow::anyhow!("turn lock table poisoned")))?;
        Ok(locks.entry(conversation_id.to_string()).or_default().clone())
    }

    /// Forget the conversation's turn lock unless a turn still holds it.
    fn release_turn_lock(&self, conversation_id: &str) -> Result<()> {
        let mut locks = self
            .turn_locks
            .lock()
            .map_err(|_| RagError::Other(anyhow::anyhow!("turn lock table poisoned")))?;
        if locks
            .get(conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(conversation_id);
        }
        Ok(())
    }

    fn log_interaction(&self, conversation_id: &str, question: &str, variant: &QueryVariant, sources: &[SourceRef]) {
        let source_ids: Vec<&str> = sources.iter().map(|s| s.source_id.as_str()).collect();
        info!(
            conversation = conversation_id,
            question,
            lexical_query = %variant.expanded,
            translated = variant.translated.as_deref().unwrap_or(""),
            sources = ?source_ids,
            "interaction"
        );
    }
}
