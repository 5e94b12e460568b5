//! CLI command runners. Results go to stdout, diagnostics to the log.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use anyhow::Result;

use campus_rag_core::preprocess::{QueryPreprocessor, SynonymMap};
use campus_rag_core::session::Feedback;
use campus_rag_core::store::IndexBackend;

use crate::app::App;
use crate::pipeline::PipelineReport;

fn print_report(report: &PipelineReport) {
    println!("index: {}", report.outcome);
    println!("  documents listed: {}", report.listed);
    println!("  documents fetched: {}", report.fetched);
    if !report.skipped.is_empty() {
        println!("  documents skipped: {}", report.skipped.len());
        for id in &report.skipped {
            println!("    - {}", id);
        }
    }
    println!("  chunks: {}", report.chunks);
    println!("  indexed: {}", report.indexed);
    if report.failed > 0 {
        println!("  failed: {}", report.failed);
    }
    if report.removed > 0 {
        println!("  removed: {}", report.removed);
    }
}

pub async fn run_index(app: &App, force: bool) -> Result<()> {
    let report = app.prepare_index(force).await?;
    print_report(&report);
    Ok(())
}

/// Retrieval only: show ranked passages without generating an answer.
pub async fn run_search(app: &App, query: &str, k: Option<usize>) -> Result<()> {
    app.prepare_index(false).await?;
    let retriever = app.retriever()?;
    let synonyms = SynonymMap::from(app.config.preprocess.synonyms.clone());
    let variant = QueryPreprocessor::new(&app.config.preprocess.corpus_language)
        .with_synonym_map(&synonyms)
        .preprocess(query, None)
        .await;

    let k = k.unwrap_or(app.config.retrieval.k_max);
    let passages = retriever.retrieve(&variant, k).await?;
    if passages.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, p) in passages.iter().enumerate() {
        let title = p.source.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {} / {}", i + 1, p.score, p.source.source_id, title);
        println!("    position: {}", p.position);
        if let Some(link) = app.source.link(&p.source.source_id) {
            println!("    url: {}", link);
        }
        let excerpt: String = p.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", p.chunk_id);
        println!();
    }
    Ok(())
}

pub async fn run_ask(app: &App, query: &str, conversation: &str) -> Result<()> {
    app.prepare_index(false).await?;
    let service = app.chat_service()?;
    let reply = service.ask(conversation, query).await?;
    println!("{}", reply.render());
    Ok(())
}

/// Interactive loop on stdin. `/start` resets the conversation, `/good`
/// and `/bad` rate the last answer, `/quit` exits.
pub async fn run_chat(app: &App, conversation: &str) -> Result<()> {
    app.prepare_index(false).await?;
    let service = app.chat_service()?;

    println!("Ask a question. Commands: /start, /good, /bad, /quit");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/start" => {
                service.reset(conversation)?;
                println!("Conversation reset.");
            }
            "/good" | "/bad" => {
                let signal = if input == "/good" {
                    Feedback::Positive
                } else {
                    Feedback::Negative
                };
                match service.feedback_last(conversation, signal) {
                    Ok(_) => println!("Thanks for the feedback."),
                    Err(e) => println!("No answer to rate yet ({}).", e),
                }
            }
            question => {
                let reply = service.ask(conversation, question).await?;
                println!("{}", reply.render());
            }
        }
    }
    Ok(())
}

pub async fn run_cache_status(app: &App) -> Result<()> {
    let cache = app.cache();
    println!("cache: {}", cache.path().display());
    let Some(snapshot) = cache.load()? else {
        println!("  status: absent");
        return Ok(());
    };

    let handles = app.source.list_documents(app.config.storage.prefix()).await?;
    let fingerprints: BTreeMap<String, String> = handles
        .into_iter()
        .map(|h| (h.source_id, h.fingerprint))
        .collect();
    let stale = snapshot.is_stale(&fingerprints, &app.config.chunking.params()?);

    println!("  status: {}", if stale { "stale" } else { "current" });
    println!("  created: {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "  chunking: size {} overlap {}",
        snapshot.params.chunk_size, snapshot.params.chunk_overlap
    );
    println!("  documents: {}", snapshot.documents.len());
    if !snapshot.skipped.is_empty() {
        println!("  undecodable: {}", snapshot.skipped.len());
    }
    println!("  chunks: {}", snapshot.chunk_count());
    println!("  storage documents: {}", fingerprints.len());
    println!("  index entries: {}", app.index.count().await?);
    Ok(())
}
