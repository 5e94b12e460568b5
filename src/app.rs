//! Wiring: build every collaborator from a validated [`Config`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use campus_rag_core::embedding::Embedder;
use campus_rag_core::preprocess::SynonymMap;
use campus_rag_core::search::HybridRetriever;
use campus_rag_core::store::IndexBackend;

use crate::cache::DocumentCache;
use crate::chat::{ChatService, ChatSettings};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::{create_generator, Generator};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::sqlite_index::SqliteIndex;
use crate::storage::{create_source, DocumentSource};
use crate::translate::LlmTranslator;

pub struct App {
    pub config: Config,
    pub source: Arc<dyn DocumentSource>,
    pub index: Arc<SqliteIndex>,
    pub embedder: Arc<dyn Embedder>,
    /// `None` when `generation.provider = "disabled"`.
    pub generator: Option<Arc<dyn Generator>>,
}

impl App {
    /// Connect to storage and the index and construct the model clients.
    ///
    /// Missing credentials for an enabled collaborator fail here, before
    /// anything is served.
    pub async fn from_config(config: Config) -> Result<Self> {
        if !config.embedding.is_enabled() {
            bail!("Embedding provider is disabled. Set [embedding] provider in config.");
        }
        let source = create_source(&config.storage).context("failed to configure storage")?;
        let embedder = create_embedder(&config.embedding).context("failed to configure embeddings")?;
        let generator = if config.generation.is_enabled() {
            Some(create_generator(&config.generation).context("failed to configure generation")?)
        } else {
            None
        };
        let pool = db::connect(&config.index.path).await?;

        Ok(Self {
            config,
            source,
            index: Arc::new(SqliteIndex::new(pool)),
            embedder,
            generator,
        })
    }

    pub fn cache(&self) -> DocumentCache {
        DocumentCache::new(&self.config.cache.path)
    }

    pub fn backend(&self) -> Arc<dyn IndexBackend> {
        self.index.clone()
    }

    pub fn pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(
            self.source.clone(),
            self.backend(),
            self.embedder.clone(),
            self.cache(),
            self.config.chunking.params()?,
        )
        .with_prefix(self.config.storage.prefix())
        .with_batch_size(self.config.index.batch_size);
        if let Some(generator) = &self.generator {
            pipeline = pipeline.with_metadata_extraction(generator.clone());
        }
        Ok(pipeline)
    }

    /// Run the startup pipeline; `force` also honours `cache.force_reprocess`.
    pub async fn prepare_index(&self, force: bool) -> Result<PipelineReport> {
        let force = force || self.config.cache.force_reprocess;
        Ok(self.pipeline()?.prepare(force).await?)
    }

    pub fn retriever(&self) -> Result<HybridRetriever> {
        Ok(HybridRetriever::new(
            self.backend(),
            self.embedder.clone(),
            self.config.retrieval.params(),
        )?)
    }

    pub fn chat_service(&self) -> Result<ChatService> {
        let Some(generator) = self.generator.clone() else {
            bail!("Generation provider is disabled. Set [generation] provider in config.");
        };
        let settings = ChatSettings {
            k: self.config.retrieval.k_max,
            token_budget: self.config.context.token_budget,
            history_turns: self.config.context.history_turns,
            corpus_language: self.config.preprocess.corpus_language.clone(),
            synonyms: SynonymMap::from(self.config.preprocess.synonyms.clone()),
            condense: true,
        };
        let mut service = ChatService::new(self.retriever()?, generator.clone(), settings)
            .with_links(self.source.clone());
        if self.config.preprocess.translate {
            service = service.with_translator(Arc::new(LlmTranslator::new(generator)));
        }
        Ok(service)
    }
}
