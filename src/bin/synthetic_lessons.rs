use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tutor_backend::db::MemoryStore;
use tutor_backend::logging;
use tutor_backend::services::gateway::LlmGateway;
use tutor_backend::services::llm_provider::LLMProvider;
use tutor_backend::services::synthetic::{self, Throttle, DEFAULT_SEED};
use tutor_backend::services::worksheet::WorksheetGenerator;

/// Generate synthetic scenario/worksheet pairs as JSONL
#[derive(Parser)]
#[command(name = "synthetic-lessons", version)]
struct Cli {
    /// Number of lessons to generate
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Output JSONL file path
    #[arg(long, default_value = "data/synthetic_lessons.jsonl")]
    output: PathBuf,

    /// Shuffle seed for the lesson plan
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _file_log_guard = logging::init_tracing(&log_level);

    let provider = LLMProvider::from_env();
    if !provider.is_available() {
        bail!("LLM provider not configured; set LLM_API_KEY or AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_API_KEY");
    }
    let timeout = provider.timeout();
    let gateway = LlmGateway::new(Arc::new(provider)).with_timeout(timeout);
    let generator = WorksheetGenerator::new(gateway, Arc::new(MemoryStore::new()));

    if let Some(parent) = cli.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(&cli.output).with_context(|| format!("creating {}", cli.output.display()))?;
    let mut out = BufWriter::new(file);

    let plan = synthetic::lesson_plan(cli.count, cli.seed);
    let summary = synthetic::generate_batch(&generator, &plan, Throttle::default(), &mut out).await?;

    tracing::info!(
        generated = summary.generated,
        failed = summary.failed,
        output = %cli.output.display(),
        "synthetic lesson batch complete"
    );
    Ok(())
}
