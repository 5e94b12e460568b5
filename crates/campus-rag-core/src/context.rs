//! Context assembly for the generation step.
//!
//! [`ContextAssembler::assemble`] turns ranked passages plus conversation
//! history into a [`ContextBundle`] whose [`text_len`](ContextBundle::text_len)
//! never exceeds the budget:
//!
//! 1. The last `history_turns` turns are folded in first, oldest first. If
//!    they alone exceed the budget, the oldest are dropped.
//! 2. Passages from the same document with adjacent positions are merged
//!    into one span (overlap removed). A merged span ranks at its best
//!    member's score.
//! 3. Spans are taken in ranked order while they fit whole. Selection stops
//!    at the first span that does not fit; nothing is ever cut mid-text.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{RetrievedPassage, SourceRef};
use crate::session::SessionTurn;

/// A contiguous span of one document included in the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPassage {
    pub source: SourceRef,
    /// Ids of the retrieved chunks merged into this span, in document order.
    pub chunk_ids: Vec<String>,
    pub text: String,
    /// Best score among the merged chunks.
    pub score: f64,
    pub first_position: usize,
    pub last_position: usize,
    pub offset: usize,
    /// 1-based index into the bundle's citations.
    pub citation: usize,
}

impl ContextPassage {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A numbered document reference for the answer's source list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub number: usize,
    pub source: SourceRef,
}

/// Bounded context handed to the generation collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBundle {
    pub history: Vec<SessionTurn>,
    pub passages: Vec<ContextPassage>,
    pub citations: Vec<Citation>,
}

impl ContextBundle {
    /// Budgeted length: chars of history turn texts plus passage texts.
    pub fn text_len(&self) -> usize {
        self.history.iter().map(SessionTurn::char_len).sum::<usize>()
            + self.passages.iter().map(ContextPassage::char_len).sum::<usize>()
    }

    /// True when no document evidence made it into the bundle.
    pub fn has_no_evidence(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passages as numbered, source-labelled blocks for a prompt.
    pub fn render_passages(&self) -> String {
        let mut out = String::new();
        for p in &self.passages {
            let label = p.source.title.as_deref().unwrap_or(p.source.file_name());
            out.push_str(&format!("[{}] {} ({})\n{}\n\n", p.citation, label, p.source.file_name(), p.text));
        }
        out.trim_end().to_string()
    }

    /// History as `Role: text` lines, oldest first.
    pub fn render_history(&self) -> String {
        self.history
            .iter()
            .map(|t| format!("{}: {}", t.role.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Unique cited sources in citation order.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.citations.iter().map(|c| c.source.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    /// How many recent turns to fold in ahead of passages.
    pub history_turns: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self { history_turns: 6 }
    }
}

impl ContextAssembler {
    pub fn new(history_turns: usize) -> Self {
        Self { history_turns }
    }

    pub fn assemble(
        &self,
        passages: &[RetrievedPassage],
        history: &[SessionTurn],
        token_budget: usize,
    ) -> ContextBundle {
        let start = history.len().saturating_sub(self.history_turns);
        let mut window: &[SessionTurn] = &history[start..];
        let mut used: usize = window.iter().map(SessionTurn::char_len).sum();
        while used > token_budget && !window.is_empty() {
            used -= window[0].char_len();
            window = &window[1..];
        }

        let mut bundle = ContextBundle {
            history: window.to_vec(),
            ..Default::default()
        };

        for mut span in merge_adjacent(passages) {
            let len = span.char_len();
            if used + len > token_budget {
                break;
            }
            used += len;
            span.citation = cite(&mut bundle.citations, &span.source);
            bundle.passages.push(span);
        }

        bundle
    }
}

fn cite(citations: &mut Vec<Citation>, source: &SourceRef) -> usize {
    if let Some(c) = citations.iter().find(|c| c.source.source_id == source.source_id) {
        return c.number;
    }
    let number = citations.len() + 1;
    citations.push(Citation {
        number,
        source: source.clone(),
    });
    number
}

/// Merge same-document passages with consecutive positions, then order the
/// spans by best score (desc), `source_id`, first position.
fn merge_adjacent(passages: &[RetrievedPassage]) -> Vec<ContextPassage> {
    let mut by_source: BTreeMap<&str, Vec<&RetrievedPassage>> = BTreeMap::new();
    for p in passages {
        by_source.entry(p.source.source_id.as_str()).or_default().push(p);
    }

    let mut spans: Vec<ContextPassage> = Vec::new();
    for (_, mut group) in by_source {
        group.sort_by_key(|p| p.position);
        group.dedup_by(|b, a| a.chunk_id == b.chunk_id);

        let mut current: Option<ContextPassage> = None;
        for p in group {
            match current.as_mut() {
                Some(span) if p.position == span.last_position + 1 => extend(span, p),
                _ => {
                    spans.extend(current.take());
                    current = Some(ContextPassage {
                        source: p.source.clone(),
                        chunk_ids: vec![p.chunk_id.clone()],
                        text: p.text.clone(),
                        score: p.score,
                        first_position: p.position,
                        last_position: p.position,
                        offset: p.offset,
                        citation: 0,
                    });
                }
            }
        }
        spans.extend(current);
    }

    spans.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.source_id.cmp(&b.source.source_id))
            .then_with(|| a.first_position.cmp(&b.first_position))
    });
    spans
}

fn extend(span: &mut ContextPassage, next: &RetrievedPassage) {
    let span_end = span.offset + span.char_len();
    if next.offset >= span_end {
        span.text.push('\n');
        span.text.push_str(&next.text);
    } else {
        let shared = span_end - next.offset;
        span.text.extend(next.text.chars().skip(shared));
    }
    span.chunk_ids.push(next.chunk_id.clone());
    span.last_position = next.position;
    span.score = span.score.max(next.score);
}
