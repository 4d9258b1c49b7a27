//! CLI binary for docsift.
//!
//! A thin shim over the library crate that maps subcommand flags to
//! `PipelineConfig`, wires a progress bar, and prints run summaries.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docsift::{
    corpus, pipeline, retrieve, BatchProgress, Category, PipelineConfig, ReportLog,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a live bar plus a per-failure log line. Items
/// complete out of order under concurrency; the bar only ever increments.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>4}/{len}  ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgress for CliProgress {
    fn on_batch_start(&self, stage: &str, total_items: usize) {
        self.bar.set_length(total_items as u64);
        let prefix = match stage {
            "enrich" => "Enriching".to_string(),
            "retrieve" => "Retrieving".to_string(),
            other => other.to_string(),
        };
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }

    fn on_item_done(&self, _key: &str) {
        self.bar.inc(1);
    }

    fn on_item_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), key, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _stage: &str, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} items completed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} items completed  ({} failed)",
                cyan("⚠"),
                bold(&succeeded.to_string()),
                succeeded + failed,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Build the insurance corpus partition from a directory of PDFs
  docsift preprocess --input-dir ./reference/insurance \
                     --corpus-dir ./corpus --category insurance

  # Convert a FAQ mapping file into its corpus partition (no PDFs involved)
  docsift import-faq --mapping ./reference/faq/pid_map_content.json \
                     --corpus-dir ./corpus

  # Answer a question set against the corpus
  docsift retrieve --questions ./dataset/questions.json \
                   --corpus-dir ./corpus -o ./dataset/predictions.json

  # Score predictions against ground truth
  docsift score --predictions ./dataset/predictions.json \
                --ground-truth ./dataset/ground_truths.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          API key for the language model
  DOCSIFT_MODEL           Override model id (default: gpt-4o)
  DOCSIFT_CONCURRENCY     Override max concurrent API calls (default: 100)
  PDFIUM_DYNAMIC_LIB_PATH Path to an existing libpdfium

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Preprocess:      docsift preprocess --input-dir pdfs/ --corpus-dir corpus/ --category finance
  3. Retrieve:        docsift retrieve --questions q.json --corpus-dir corpus/ -o pred.json
"#;

/// Answer document-retrieval questions over PDF corpora using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "docsift",
    version,
    about = "LLM-assisted document retrieval over PDF corpora",
    long_about = "Preprocess category-partitioned PDF corpora into merged-text reference \
partitions (with vision-model enrichment for image-heavy pages), answer natural-language \
questions by LLM document selection, and score predictions against ground truth.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSIFT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, enrich, and merge one category's PDFs into its corpus partition.
    Preprocess {
        /// Directory of `<document_id>.pdf` files for one category.
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory receiving the corpus partition files.
        #[arg(long)]
        corpus_dir: PathBuf,

        /// Category of the input documents: finance, insurance, or faq.
        #[arg(long)]
        category: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Answer a question set against an existing corpus.
    Retrieve {
        /// Questions file (JSON).
        #[arg(long)]
        questions: PathBuf,

        /// Directory holding the corpus partition files.
        #[arg(long)]
        corpus_dir: PathBuf,

        /// Where to write the predictions file.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Score a predictions file against ground truth.
    Score {
        /// Predictions file produced by `retrieve`.
        #[arg(long)]
        predictions: PathBuf,

        /// Ground-truth file.
        #[arg(long)]
        ground_truth: PathBuf,
    },

    /// Convert a FAQ mapping file into the faq corpus partition.
    ImportFaq {
        /// The `pid -> content` mapping file.
        #[arg(long)]
        mapping: PathBuf,

        /// Directory receiving the corpus partition files.
        #[arg(long)]
        corpus_dir: PathBuf,
    },
}

/// Flags shared by the subcommands that call the model.
#[derive(Args, Debug)]
struct RunArgs {
    /// Model id sent to the API.
    #[arg(long, env = "DOCSIFT_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Maximum concurrent API calls.
    #[arg(short, long, env = "DOCSIFT_CONCURRENCY", default_value_t = 100)]
    concurrency: usize,

    /// Retries per failed API call.
    #[arg(long, env = "DOCSIFT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "DOCSIFT_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "DOCSIFT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Minimum non-whitespace characters for a page's text to count as sufficient.
    #[arg(long, env = "DOCSIFT_MIN_TEXT_CHARS", default_value_t = 50)]
    min_text_chars: usize,

    /// Largest tolerated hole in a document's page sequence.
    #[arg(long, env = "DOCSIFT_MAX_PAGE_GAP", default_value_t = 1)]
    max_page_gap: u32,

    /// Error log file for tolerated per-unit failures.
    #[arg(long, env = "DOCSIFT_ERROR_LOG", default_value = "error_log.txt")]
    error_log: PathBuf,

    /// Disable the progress bar.
    #[arg(long, env = "DOCSIFT_NO_PROGRESS")]
    no_progress: bool,
}

impl RunArgs {
    fn build_config(&self, show_progress: bool) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder()
            .model_name(self.model.clone())
            .concurrency(self.concurrency)
            .max_retries(self.max_retries)
            .retry_backoff_ms(self.retry_backoff_ms)
            .api_timeout_secs(self.api_timeout)
            .min_text_chars(self.min_text_chars)
            .max_page_gap(self.max_page_gap);

        if show_progress {
            builder = builder.progress(CliProgress::new());
        }

        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides the feedback that matters.
    let show_progress = !cli.quiet && !wants_no_progress(&cli.command);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Preprocess {
            input_dir,
            corpus_dir,
            category,
            run,
        } => {
            let category: Category = category
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let config = run.build_config(show_progress)?;
            let report = ReportLog::to_file(&run.error_log)
                .with_context(|| format!("Failed to create error log {:?}", run.error_log))?;

            let (path, stats) =
                pipeline::preprocess_category(&input_dir, &corpus_dir, category, &config, &report)
                    .await
                    .context("Preprocessing failed")?;

            if !cli.quiet {
                eprintln!(
                    "{}  {} documents ({} pages, {} enriched)  {}ms  →  {}",
                    status_mark(report.error_count()),
                    stats.documents_written,
                    stats.pages_extracted,
                    stats.pages_enriched,
                    stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out  /  {} errors logged",
                    dim(&stats.prompt_tokens.to_string()),
                    dim(&stats.completion_tokens.to_string()),
                    dim(&report.error_count().to_string()),
                );
            }
        }

        Command::Retrieve {
            questions,
            corpus_dir,
            output,
            run,
        } => {
            let config = run.build_config(show_progress)?;
            let report = ReportLog::to_file(&run.error_log)
                .with_context(|| format!("Failed to create error log {:?}", run.error_log))?;

            let stats =
                retrieve::retrieve_to_file(&questions, &corpus_dir, &output, &config, &report)
                    .await
                    .context("Retrieval failed")?;

            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} answered ({} fallbacks)  {}ms  →  {}",
                    status_mark(stats.fallbacks),
                    stats.answered,
                    stats.total_queries,
                    stats.fallbacks,
                    stats.duration_ms,
                    bold(&output.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out  /  {} errors logged",
                    dim(&stats.prompt_tokens.to_string()),
                    dim(&stats.completion_tokens.to_string()),
                    dim(&report.error_count().to_string()),
                );
            }
        }

        Command::Score {
            predictions,
            ground_truth,
        } => {
            let report = docsift::score_files(&predictions, &ground_truth)
                .context("Scoring failed")?;

            for m in &report.mismatches {
                println!(
                    "qid {}: predicted {}, expected {}",
                    m.qid, m.predicted, m.expected
                );
            }
            for qid in &report.unmatched_qids {
                println!("qid {qid}: no ground-truth entry");
            }
            println!("Precision: {:.4}", report.precision());
        }

        Command::ImportFaq {
            mapping,
            corpus_dir,
        } => {
            let path = corpus::import_faq(&mapping, &corpus_dir).context("FAQ import failed")?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
    }

    Ok(())
}

fn wants_no_progress(command: &Command) -> bool {
    match command {
        Command::Preprocess { run, .. } | Command::Retrieve { run, .. } => run.no_progress,
        Command::Score { .. } | Command::ImportFaq { .. } => true,
    }
}

fn status_mark(failures: usize) -> String {
    if failures == 0 {
        green("✔")
    } else {
        cyan("⚠")
    }
}
