//! Query preprocessing: synonym expansion and translation.
//!
//! Turns a raw user question into a [`QueryVariant`]:
//!
//! - **Synonym expansion** appends the equivalents of every mapped term to
//!   the *lexical* text only. The vector search keeps the original text
//!   because embeddings already capture synonymy.
//! - **Translation** adds a variant in the corpus language when the query's
//!   detected (or declared) language differs from it.
//!
//! Both steps are best-effort. A failing synonym lookup leaves the lexical
//! text equal to the original; a failing translation leaves `translated`
//! empty. Preprocessing itself never fails a turn.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::QueryVariant;

/// Text-to-text translation collaborator.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String>;
}

/// Synonym lookup collaborator.
#[async_trait]
pub trait SynonymProvider: Send + Sync {
    /// Equivalent terms for `term`, empty when unmapped.
    async fn synonyms(&self, term: &str) -> Result<Vec<String>>;
}

/// Static, configured synonym mapping (term → equivalents).
///
/// Keys match case-insensitively. Multi-word keys (`"exchange program"`)
/// match as phrases.
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    entries: Vec<(String, Vec<String>)>,
}

impl SynonymMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, vs)| (k.into().to_lowercase(), vs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn phrase_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.contains(char::is_whitespace))
    }
}

impl From<BTreeMap<String, Vec<String>>> for SynonymMap {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self::new(map)
    }
}

#[async_trait]
impl SynonymProvider for SynonymMap {
    async fn synonyms(&self, term: &str) -> Result<Vec<String>> {
        let term = term.to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|(k, _)| *k == term)
            .flat_map(|(_, vs)| vs.iter().cloned())
            .collect())
    }
}

/// Detect the language of `text`: Cyrillic letters mean `"ru"`, else `"en"`.
pub fn detect_language(text: &str) -> &'static str {
    let cyrillic = text
        .chars()
        .any(|c| matches!(c, '\u{0400}'..='\u{04FF}'));
    if cyrillic {
        "ru"
    } else {
        "en"
    }
}

/// Builds [`QueryVariant`]s from raw queries.
pub struct QueryPreprocessor<'a> {
    synonyms: Option<&'a dyn SynonymProvider>,
    translator: Option<&'a dyn Translator>,
    corpus_language: String,
    phrase_keys: Vec<String>,
}

impl<'a> QueryPreprocessor<'a> {
    pub fn new(corpus_language: &str) -> Self {
        Self {
            synonyms: None,
            translator: None,
            corpus_language: corpus_language.to_string(),
            phrase_keys: Vec::new(),
        }
    }

    pub fn with_synonyms(mut self, synonyms: &'a dyn SynonymProvider) -> Self {
        self.synonyms = Some(synonyms);
        self
    }

    /// Use a static map, which also enables phrase matching for its multi-word keys.
    pub fn with_synonym_map(mut self, map: &'a SynonymMap) -> Self {
        self.phrase_keys = map.phrase_keys().map(str::to_string).collect();
        self.synonyms = Some(map);
        self
    }

    pub fn with_translator(mut self, translator: &'a dyn Translator) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Preprocess one query turn.
    ///
    /// `language_hint` overrides language detection when given.
    pub async fn preprocess(&self, raw_query: &str, language_hint: Option<&str>) -> QueryVariant {
        let original = raw_query.trim().to_string();
        if original.is_empty() {
            return QueryVariant::plain(&original);
        }

        let expanded = match self.expand(&original).await {
            Ok(expanded) => expanded,
            Err(e) => {
                warn!(error = %e, "synonym expansion unavailable, using original query");
                original.clone()
            }
        };

        let language = language_hint.unwrap_or_else(|| detect_language(&original));
        let translated = match self.translator {
            Some(translator) if language != self.corpus_language => {
                match translator
                    .translate(&original, language, &self.corpus_language)
                    .await
                {
                    Ok(t) if !t.trim().is_empty() && t.trim() != original => {
                        Some(t.trim().to_string())
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, from = language, "query translation failed, continuing without it");
                        None
                    }
                }
            }
            _ => None,
        };

        debug!(original = %original, expanded = %expanded, translated = ?translated, "preprocessed query");

        QueryVariant {
            original,
            expanded,
            translated,
        }
    }

    /// Append synonyms of mapped terms that are not already in the query.
    async fn expand(&self, query: &str) -> Result<String> {
        let Some(provider) = self.synonyms else {
            return Ok(query.to_string());
        };

        let lowered = query.to_lowercase();
        let words: Vec<String> = query
            .split_whitespace()
            .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut lookups: Vec<&str> = words.iter().map(String::as_str).collect();
        for phrase in &self.phrase_keys {
            if lowered.contains(phrase.as_str()) {
                lookups.push(phrase);
            }
        }

        let mut appended: Vec<String> = Vec::new();
        for term in lookups {
            for syn in provider.synonyms(term).await? {
                let syn_lower = syn.to_lowercase();
                let present = words.contains(&syn_lower)
                    || appended.iter().any(|a| a.to_lowercase() == syn_lower);
                if !present {
                    appended.push(syn);
                }
            }
        }

        if appended.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(format!("{} {}", query, appended.join(" ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    struct FixedTranslator(&'static str);

    #[async_trait]
    impl Translator for FixedTranslator {
        async fn translate(&self, _text: &str, _from: &str, _to: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct DownTranslator;

    #[async_trait]
    impl Translator for DownTranslator {
        async fn translate(&self, _text: &str, _from: &str, _to: &str) -> Result<String> {
            Err(RagError::Transient("translation service unavailable".into()))
        }
    }

    struct DownThesaurus;

    #[async_trait]
    impl SynonymProvider for DownThesaurus {
        async fn synonyms(&self, _term: &str) -> Result<Vec<String>> {
            Err(RagError::Transient("thesaurus timeout".into()))
        }
    }

    fn tuition_map() -> SynonymMap {
        SynonymMap::new(vec![("tuition", vec!["fee", "payment"])])
    }

    #[tokio::test]
    async fn test_synonyms_only_touch_lexical_text() {
        let map = tuition_map();
        let pre = QueryPreprocessor::new("en").with_synonym_map(&map);
        let v = pre.preprocess("tuition deadline", None).await;
        assert_eq!(v.expanded, "tuition deadline fee payment");
        assert_eq!(v.original, "tuition deadline");
        assert_eq!(v.translated, None);
    }

    #[tokio::test]
    async fn test_synonym_match_ignores_case_and_punctuation() {
        let map = tuition_map();
        let pre = QueryPreprocessor::new("en").with_synonym_map(&map);
        let v = pre.preprocess("When is TUITION due?", None).await;
        assert_eq!(v.expanded, "When is TUITION due? fee payment");
    }

    #[tokio::test]
    async fn test_synonyms_already_present_not_repeated() {
        let map = tuition_map();
        let pre = QueryPreprocessor::new("en").with_synonym_map(&map);
        let v = pre.preprocess("tuition fee", None).await;
        assert_eq!(v.expanded, "tuition fee payment");
    }

    #[tokio::test]
    async fn test_phrase_keys() {
        let map = SynonymMap::new(vec![("exchange program", vec!["included learning"])]);
        let pre = QueryPreprocessor::new("en").with_synonym_map(&map);
        let v = pre.preprocess("How do I apply to an exchange program", None).await;
        assert!(v.expanded.ends_with("included learning"));
    }

    #[tokio::test]
    async fn test_synonym_failure_falls_back_to_original() {
        let down = DownThesaurus;
        let pre = QueryPreprocessor::new("en").with_synonyms(&down);
        let v = pre.preprocess("tuition deadline", None).await;
        assert_eq!(v, QueryVariant::plain("tuition deadline"));
    }

    #[tokio::test]
    async fn test_translation_when_language_differs() {
        let tr = FixedTranslator("exam schedule");
        let pre = QueryPreprocessor::new("en").with_translator(&tr);
        let v = pre.preprocess("расписание экзаменов", None).await;
        assert_eq!(v.translated.as_deref(), Some("exam schedule"));
        assert_eq!(v.original, "расписание экзаменов");
    }

    #[tokio::test]
    async fn test_no_translation_when_language_matches() {
        let tr = FixedTranslator("should not be used");
        let pre = QueryPreprocessor::new("en").with_translator(&tr);
        let v = pre.preprocess("exam schedule", None).await;
        assert_eq!(v.translated, None);
    }

    #[tokio::test]
    async fn test_language_hint_overrides_detection() {
        let tr = FixedTranslator("расписание");
        let pre = QueryPreprocessor::new("ru").with_translator(&tr);
        let v = pre.preprocess("MiBA", Some("en")).await;
        assert_eq!(v.translated.as_deref(), Some("расписание"));
    }

    #[tokio::test]
    async fn test_translation_failure_degrades() {
        let tr = DownTranslator;
        let map = tuition_map();
        let pre = QueryPreprocessor::new("ru")
            .with_synonym_map(&map)
            .with_translator(&tr);
        let v = pre.preprocess("tuition deadline", None).await;
        assert_eq!(v.translated, None);
        assert_eq!(v.expanded, "tuition deadline fee payment");
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("Когда экзамен?"), "ru");
        assert_eq!(detect_language("When is the exam?"), "en");
        assert_eq!(detect_language("GSOM ВШМ"), "ru");
    }
}
