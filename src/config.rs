//! Configuration parsing and validation.
//!
//! Configuration is a single TOML file (default `./config/rag.toml`).
//! [`load_config`] parses it and rejects invalid values before anything
//! touches storage, the index, or a model endpoint. Credentials never live
//! in the file; they come from the environment (`AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`, `OPENAI_API_KEY`).
//!
//! ```toml
//! [storage]
//! kind = "s3"
//! bucket = "campus-docs"
//! prefix = "rag/"
//! region = "ru-central1"
//! endpoint_url = "https://storage.yandexcloud.net"
//!
//! [chunking]
//! chunk_size = 1500
//! chunk_overlap = 150
//!
//! [index]
//! path = "./data/index.sqlite"
//!
//! [cache]
//! path = "./data/processed_docs.json"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! k_max = 5
//! min_score = 0.2
//!
//! [preprocess.synonyms]
//! tuition = ["fee", "payment"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use campus_rag_core::chunk::ChunkParams;
use campus_rag_core::search::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    S3(S3StorageConfig),
    Filesystem(FilesystemStorageConfig),
}

impl StorageConfig {
    pub fn prefix(&self) -> &str {
        match self {
            StorageConfig::S3(s3) => &s3.prefix,
            StorageConfig::Filesystem(_) => "",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint (Yandex Object Storage, MinIO). Uses path-style URLs.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_s3_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Lifetime of presigned source links, in seconds.
    #[serde(default = "default_link_expiry")]
    pub link_expiry_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_s3_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_link_expiry() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemStorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_fs_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_fs_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        Ok(ChunkParams::new(self.chunk_size, self.chunk_overlap)?)
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Entries written per batch during indexing.
    #[serde(default = "default_index_batch")]
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            batch_size: default_index_batch(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}
fn default_index_batch() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Re-fetch and re-index from storage even when the cache is current.
    #[serde(default)]
    pub force_reprocess: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            force_reprocess: false,
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/processed_docs.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_generation_timeout() -> u64 {
    90
}
fn default_generation_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_candidate_n")]
    pub candidate_n: usize,
    #[serde(default = "default_k_max")]
    pub k_max: usize,
    #[serde(default)]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            candidate_n: default_candidate_n(),
            k_max: default_k_max(),
            min_score: 0.0,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            alpha: self.alpha,
            candidate_n: self.candidate_n,
            k_max: self.k_max,
            min_score: self.min_score,
        }
    }
}

fn default_alpha() -> f64 {
    0.5
}
fn default_candidate_n() -> usize {
    20
}
fn default_k_max() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Maximum chars of history + passages handed to generation.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_token_budget() -> usize {
    8000
}
fn default_history_turns() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessConfig {
    #[serde(default = "default_corpus_language")]
    pub corpus_language: String,
    /// Translate queries whose language differs from the corpus.
    #[serde(default)]
    pub translate: bool,
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            corpus_language: default_corpus_language(),
            translate: false,
            synonyms: BTreeMap::new(),
        }
    }
}

fn default_corpus_language() -> String {
    "ru".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config
        .chunking
        .params()
        .context("invalid [chunking] section")?;

    config
        .retrieval
        .params()
        .validate()
        .context("invalid [retrieval] section")?;

    if config.index.batch_size == 0 {
        bail!("index.batch_size must be > 0");
    }
    if config.context.token_budget == 0 {
        bail!("context.token_budget must be > 0");
    }

    match &config.storage {
        StorageConfig::S3(s3) if s3.bucket.is_empty() => bail!("storage.bucket must be set"),
        _ => {}
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!("generation.model must be specified when provider is 'openai'");
    }
    if config.preprocess.translate && !config.generation.is_enabled() {
        bail!("preprocess.translate requires a [generation] provider");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[storage]
kind = "filesystem"
root = "./docs"
"#;

    #[test]
    fn test_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 1500);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.k_max, 5);
        assert!((config.retrieval.alpha - 0.5).abs() < 1e-9);
        assert!(!config.embedding.is_enabled());
        assert!(!config.cache.force_reprocess);
        assert_eq!(config.storage.prefix(), "");
    }

    #[test]
    fn test_s3_and_synonyms() {
        let config = parse_config(
            r#"
[storage]
kind = "s3"
bucket = "campus-docs"
prefix = "rag/"

[preprocess.synonyms]
tuition = ["fee", "payment"]
"#,
        )
        .unwrap();
        match &config.storage {
            StorageConfig::S3(s3) => {
                assert_eq!(s3.bucket, "campus-docs");
                assert_eq!(s3.link_expiry_secs, 3600);
            }
            other => panic!("unexpected storage {:?}", other),
        }
        assert_eq!(config.storage.prefix(), "rag/");
        assert_eq!(
            config.preprocess.synonyms.get("tuition"),
            Some(&vec!["fee".to_string(), "payment".to_string()])
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(&format!(
            "{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
            MINIMAL
        ))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("chunking"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let err = parse_config(&format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        ))
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse_config(&format!("{}\n[embedding]\nprovider = \"cohere\"\n", MINIMAL)).is_err());
        assert!(parse_config(&format!("{}\n[generation]\nprovider = \"yandex\"\n", MINIMAL)).is_err());
    }

    #[test]
    fn test_translate_requires_generation() {
        let err = parse_config(&format!("{}\n[preprocess]\ntranslate = true\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("translate"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../config/rag.example.toml")).unwrap();
        assert!(config.embedding.is_enabled());
        assert!(config.preprocess.translate);
        assert_eq!(config.context.history_turns, 20);
        assert_eq!(
            config.preprocess.synonyms.get("exchange program").map(Vec::len),
            Some(2)
        );
    }
}
