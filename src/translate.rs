//! Translation through the generation collaborator.

use async_trait::async_trait;
use std::sync::Arc;

use campus_rag_core::preprocess::Translator;
use campus_rag_core::Result;

use crate::generation::Generator;

/// [`Translator`] that asks the language model for a plain translation.
pub struct LlmTranslator {
    generator: Arc<dyn Generator>,
}

impl LlmTranslator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "ru" => "Russian",
        "en" => "English",
        other => other,
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        let system = format!(
            "Translate the user's text from {} to {}. Reply with the translation only.",
            language_name(from),
            language_name(to)
        );
        let reply = self.generator.complete(&system, text).await?;
        Ok(reply.trim().trim_matches('"').to_string())
    }
}
