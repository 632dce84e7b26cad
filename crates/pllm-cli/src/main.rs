//! pllm - infer a runnable environment for a Python snippet
//!
//! The `pllm` command asks a local model for the interpreter version and
//! modules a snippet needs, then explores a window of interpreter versions
//! in parallel. Every version gets a bounded build → run → repair loop in
//! its own Docker sandbox and writes `output_data_<version>.yml` next to the
//! snippet.
//!
//! The process exits 0 whenever exploration completes, whatever the
//! individual loop outcomes; those are in the run logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use pllm_core::oracle::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
use pllm_core::repair_loop::DEFAULT_MAX_ITERATIONS;
use pllm_core::{
    infer_environment, Coordinator, CoordinatorConfig, DockerBackend, ExplorationResult, LoopConfig,
    LoopServices, LoopStatus, NameAliases, OllamaConfig, OllamaOracle, OracleSession, RetryPolicy,
};
use pypi_resolver::{CandidateCache, CandidateResolver, PypiClient};

#[derive(Parser)]
#[command(name = "pllm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Infer and repair the Python environment a snippet needs", long_about = None)]
struct Cli {
    /// Python snippet to run
    #[arg(short, long)]
    file: PathBuf,

    /// Ollama server URL
    #[arg(short, long, env = "PLLM_OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    base: String,

    /// Model tag
    #[arg(short, long, env = "PLLM_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(short, long, default_value_t = 0.7)]
    temp: f32,

    /// Repair iterations per interpreter version
    #[arg(short, long = "loop", default_value_t = DEFAULT_MAX_ITERATIONS)]
    loops: u32,

    /// Interpreter versions explored on each side of the inferred one
    #[arg(short, long = "range", default_value_t = 0)]
    range: usize,

    /// Give scanned imports to the model as context (default)
    #[arg(long, overrides_with = "no_rag")]
    rag: bool,

    /// Ask the model without scanned imports
    #[arg(long = "no-rag", overrides_with = "rag")]
    no_rag: bool,

    /// Wall-clock limit per interpreter version, in seconds
    #[arg(long, default_value_t = 20 * 60)]
    timeout_secs: u64,

    /// Always explore Python 2.7 as well
    #[arg(long)]
    include_legacy: bool,

    /// Candidate cache directory (default: `modules` next to the snippet)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Extra import → install name aliases (JSON: {"name": {"ref": "install"}})
    #[arg(long)]
    aliases: Option<PathBuf>,

    /// Write the per-version results as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pllm_core::telemetry::init_tracing(cli.json, level);

    let source = cli
        .file
        .canonicalize()
        .with_context(|| format!("Snippet not found: {}", cli.file.display()))?;

    let mut names = NameAliases::builtin();
    if let Some(path) = &cli.aliases {
        names = names
            .with_file(path)
            .with_context(|| format!("Failed to load aliases from {}", path.display()))?;
    }
    let names = Arc::new(names);

    let cache_dir = cli
        .cache_dir
        .clone()
        .unwrap_or_else(|| snippet_dir(&source).join("modules"));
    let cache = CandidateCache::new(&cache_dir)
        .with_context(|| format!("Failed to open candidate cache {}", cache_dir.display()))?;
    let registry = PypiClient::public().context("Failed to build package index client")?;
    let resolver = Arc::new(CandidateResolver::new(Arc::new(registry), cache));

    let oracle = OllamaOracle::new(OllamaConfig {
        base_url: cli.base.clone(),
        model: cli.model.clone(),
        temperature: cli.temp,
    })
    .context("Failed to build oracle client")?;

    let loop_config = LoopConfig {
        max_iterations: cli.loops,
        ..LoopConfig::default()
    };
    let retry = RetryPolicy::default();
    let session = OracleSession::new(Arc::new(oracle), loop_config.oracle_attempts, retry.clone());

    let use_scanned = cli.rag || !cli.no_rag;
    let inferred = infer_environment(&session, &names, &source, use_scanned)
        .await
        .context("Failed to infer environment")?;

    let services = LoopServices {
        oracle: session,
        backend: Arc::new(DockerBackend::default()),
        resolver,
        names,
        retry,
    };
    let coordinator = Coordinator::new(
        services,
        loop_config,
        CoordinatorConfig {
            window: cli.range,
            loop_timeout: Duration::from_secs(cli.timeout_secs),
            include_legacy_interpreter: cli.include_legacy,
        },
    );

    let results = coordinator.explore(&source, &inferred).await;
    print_summary(&results);

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "wrote report");
    }

    Ok(())
}

fn snippet_dir(source: &Path) -> PathBuf {
    source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_summary(results: &[ExplorationResult]) {
    println!("{:<8} {:<28} {:>5}  LOG", "PYTHON", "OUTCOME", "ITERS");
    for result in results {
        let (outcome, iterations) = match &result.status {
            LoopStatus::Completed { report } => {
                (report.outcome.label(), report.iterations.to_string())
            }
            LoopStatus::TimedOut => ("timed_out".to_string(), "-".to_string()),
            LoopStatus::Crashed { .. } => ("crashed".to_string(), "-".to_string()),
        };
        println!(
            "{:<8} {:<28} {:>5}  {}",
            result.interpreter_version,
            outcome,
            iterations,
            result.log_path.display()
        );
        if let Some(report) = result.report() {
            if report.outcome.is_success() {
                println!("         {}", report.spec.requirements().join(" "));
            }
        }
    }
}
