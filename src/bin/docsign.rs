//! CLI binary for docsign.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one pipeline operation and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docsign::pipeline::encode::encode_payload;
use docsign::{
    ConverterStrategy, DeliveryAgent, DeliveryConfig, DeliveryStatus, DocumentId, EngineCommand,
    HttpRelayDelivery, Observer, OutboxDelivery, Pipeline, PipelineConfig, PipelineError,
    PipelineObserver, PipelineState, Presentation, SigningOutcome, SigningSubmission,
    SourceFormat, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner naming the running stage, plus one log line
/// per state transition.
struct CliObserver {
    bar: ProgressBar,
    started: Instant,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, subject: &str, stage: Stage) {
        let prefix = match stage {
            Stage::Upload => "Uploading",
            Stage::Convert => "Converting",
            Stage::Present => "Presenting",
            Stage::Compose => "Signing",
            Stage::Persist => "Saving",
            Stage::Deliver => "Delivering",
            Stage::Setup => "Preparing",
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(subject.to_string());
    }

    fn on_transition(&self, subject: &str, from: &PipelineState, to: &PipelineState) {
        let elapsed = dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64()));
        match to {
            PipelineState::Failed { stage, reason } => self.bar.println(format!(
                "  {} {:<14} {}  {}",
                red("✗"),
                stage.to_string(),
                red(reason),
                elapsed
            )),
            _ => self.bar.println(format!(
                "  {} {:<14} {}  {}",
                green("✓"),
                to.to_string(),
                dim(&format!("{from} → {to}  {subject}")),
                elapsed
            )),
        }
    }

    fn on_delivery_failed(&self, subject: &str, error: &str) {
        self.bar.println(format!(
            "  {} {:<14} {}  {}",
            yellow("⚠"),
            "delivery",
            yellow(error),
            dim(subject)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload, convert with LibreOffice and sign in one go
  docsign run contract.docx --signature sig.png

  # Without LibreOffice: re-typeset the text (reduced fidelity)
  docsign --strategy text-reflow run contract.docx --signature sig.png

  # Keep the DOCX and sign it in place
  docsign --strategy native-round-trip run contract.docx --signature sig.png

  # Step by step, as the web flow does
  docsign upload contract.docx
  docsign convert 3f0c...e1.docx
  docsign sign 3f0c...e1.docx.pdf --signature sig.png

  # Mail the signed copy through an HTTP relay
  docsign --relay-url https://mail.example.com/send --relay-token $TOKEN \
          --sender office@example.com run contract.docx --signature sig.png

STRATEGIES:
  native-engine      LibreOffice renders DOC/DOCX to PDF (default, full fidelity)
  text-reflow        text extracted from DOCX and set as a plain PDF
  native-round-trip  DOCX kept as-is, signature appended at the end

ENVIRONMENT VARIABLES:
  DOCSIGN_STORAGE_DIR     Artifact store root (default: ./uploads)
  DOCSIGN_STRATEGY        Converter strategy
  DOCSIGN_ENGINE          Office engine binary (default: soffice)
  DOCSIGN_RELAY_URL       Mail relay endpoint
  DOCSIGN_RELAY_TOKEN     Bearer token for the mail relay
  DOCSIGN_SENDER          Sender address
  DOCSIGN_RECIPIENT       Recipient address (default: sender)
  DOCSIGN_OUTBOX          Write outgoing mail to this directory instead
"#;

/// Convert Word documents to signable form and composite a signature onto them.
#[derive(Parser, Debug)]
#[command(
    name = "docsign",
    version,
    about = "Convert Word documents and composite a hand-drawn signature onto them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Artifact store directory.
    #[arg(long, global = true, env = "DOCSIGN_STORAGE_DIR", default_value = "uploads")]
    storage_dir: PathBuf,

    /// Public URL prefix of the artifact store.
    #[arg(long, global = true, env = "DOCSIGN_BASE_URL", default_value = "/uploads")]
    base_url: String,

    /// Converter strategy.
    #[arg(long, global = true, env = "DOCSIGN_STRATEGY", value_enum, default_value = "native-engine")]
    strategy: StrategyArg,

    /// Office engine binary for the native-engine strategy.
    #[arg(long, global = true, env = "DOCSIGN_ENGINE", default_value = "soffice")]
    engine: String,

    /// Extra argument placed before the conversion flags (repeatable).
    #[arg(long = "engine-arg", global = true, allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Engine timeout in seconds.
    #[arg(long, global = true, env = "DOCSIGN_ENGINE_TIMEOUT", default_value_t = 120)]
    engine_timeout: u64,

    /// Mail relay endpoint for delivering signed documents.
    #[arg(long, global = true, env = "DOCSIGN_RELAY_URL")]
    relay_url: Option<String>,

    /// Bearer token for the mail relay.
    #[arg(long, global = true, env = "DOCSIGN_RELAY_TOKEN", hide_env_values = true)]
    relay_token: Option<String>,

    /// Mail relay timeout in seconds.
    #[arg(long, global = true, env = "DOCSIGN_RELAY_TIMEOUT", default_value_t = 30)]
    relay_timeout: u64,

    /// Write outgoing mail to this directory instead of a relay.
    #[arg(long, global = true, env = "DOCSIGN_OUTBOX")]
    outbox: Option<PathBuf>,

    /// Sender address.
    #[arg(long, global = true, env = "DOCSIGN_SENDER", default_value = "")]
    sender: String,

    /// Recipient address (defaults to the sender).
    #[arg(long, global = true, env = "DOCSIGN_RECIPIENT", default_value = "")]
    recipient: String,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "DOCSIGN_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, global = true, env = "DOCSIGN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSIGN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSIGN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and store a DOC/DOCX file; prints its document id.
    Upload {
        file: PathBuf,
        /// Declared media type (default: derived from the extension).
        #[arg(long)]
        media_type: Option<String>,
    },
    /// Convert a stored document and print where to review it.
    Convert { document_id: String },
    /// Composite a signature onto a converted document.
    Sign {
        artifact_id: String,
        #[command(flatten)]
        signature: SignatureArg,
    },
    /// Upload, convert and sign in one step.
    Run {
        file: PathBuf,
        #[arg(long)]
        media_type: Option<String>,
        #[command(flatten)]
        signature: SignatureArg,
    },
}

#[derive(Args, Debug)]
struct SignatureArg {
    /// PNG/JPEG image, or a text file holding a `data:image/...;base64,` URL.
    #[arg(long, short = 's')]
    signature: PathBuf,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    NativeEngine,
    TextReflow,
    NativeRoundTrip,
}

impl From<StrategyArg> for ConverterStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::NativeEngine => ConverterStrategy::NativeEngine,
            StrategyArg::TextReflow => ConverterStrategy::TextReflow,
            StrategyArg::NativeRoundTrip => ConverterStrategy::NativeRoundTrip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports each transition, so library INFO logs are
    // hidden while it runs.
    let show_progress = !g.quiet && !g.no_progress && !g.json;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    let observer = show_progress.then(CliObserver::new);
    let config = build_config(g, observer.clone())?;
    let pipeline = Pipeline::new(config);

    let result = execute(&pipeline, &cli.command, g).await;
    if let Some(ref obs) = observer {
        obs.finish();
    }

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if g.json {
                if let Some(pe) = err.downcast_ref::<PipelineError>() {
                    let mut value = serde_json::to_value(pe.to_failure())
                        .context("Failed to serialise error")?;
                    value["success"] = serde_json::Value::Bool(false);
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    std::process::exit(1);
                }
            }
            Err(err)
        }
    }
}

async fn execute(pipeline: &Pipeline, command: &Command, g: &GlobalArgs) -> Result<()> {
    match command {
        Command::Upload { file, media_type } => {
            let id = upload(pipeline, file, media_type.as_deref()).await?;
            if g.json {
                println!("{}", serde_json::json!({ "success": true, "document_id": id }));
            } else {
                println!("{id}");
            }
        }
        Command::Convert { document_id } => {
            let id = DocumentId::parse(document_id).context("Invalid document id")?;
            let presentation = pipeline.convert(&id).await?;
            print_presentation(&presentation, g)?;
        }
        Command::Sign {
            artifact_id,
            signature,
        } => {
            let payload = read_signature(&signature.signature).await?;
            let outcome = pipeline
                .sign(&SigningSubmission {
                    document_identity: artifact_id.clone(),
                    signature_payload: payload,
                })
                .await?;
            print_outcome(&outcome, g)?;
        }
        Command::Run {
            file,
            media_type,
            signature,
        } => {
            let payload = read_signature(&signature.signature).await?;
            let id = upload(pipeline, file, media_type.as_deref()).await?;
            let presentation = pipeline.convert(&id).await?;
            if !g.json {
                print_presentation(&presentation, g)?;
            }
            let outcome = pipeline
                .sign(&SigningSubmission {
                    document_identity: presentation.artifact_id.to_string(),
                    signature_payload: payload,
                })
                .await?;
            print_outcome(&outcome, g)?;
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs, observer: Option<Arc<CliObserver>>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .storage_dir(&g.storage_dir)
        .public_base_url(g.base_url.clone())
        .strategy(g.strategy.into())
        .engine(EngineCommand::new(g.engine.clone()).with_args(g.engine_args.clone()))
        .engine_timeout_secs(g.engine_timeout)
        .delivery(DeliveryConfig {
            sender: g.sender.clone(),
            recipient: g.recipient.clone(),
        });

    if let Some(agent) = build_delivery(g)? {
        builder = builder.delivery_agent(agent);
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs as Observer);
    }

    builder.build().context("Invalid configuration")
}

/// Relay wins over outbox; with neither, signed documents are only stored.
fn build_delivery(g: &GlobalArgs) -> Result<Option<Arc<dyn DeliveryAgent>>> {
    if let Some(ref url) = g.relay_url {
        let agent = HttpRelayDelivery::new(
            url.clone(),
            g.relay_token.clone(),
            Duration::from_secs(g.relay_timeout),
        )
        .context("Failed to create mail relay client")?;
        return Ok(Some(Arc::new(agent)));
    }
    if let Some(ref dir) = g.outbox {
        return Ok(Some(Arc::new(OutboxDelivery::new(dir.clone()))));
    }
    Ok(None)
}

async fn upload(pipeline: &Pipeline, file: &Path, media_type: Option<&str>) -> Result<DocumentId> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let media_type = media_type.map(str::to_string).unwrap_or_else(|| {
        file.extension()
            .and_then(|e| e.to_str())
            .and_then(SourceFormat::from_extension)
            .map(|f| f.media_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    });
    Ok(pipeline.upload(&file_name, &media_type, bytes).await?)
}

/// Accept either an image file or a file that already holds a data URL.
async fn read_signature(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read signature {}", path.display()))?;
    if bytes.starts_with(b"data:") {
        return String::from_utf8(bytes).context("Signature data URL is not UTF-8");
    }
    encode_payload(&bytes).with_context(|| format!("Unusable signature image {}", path.display()))
}

fn print_presentation(p: &Presentation, g: &GlobalArgs) -> Result<()> {
    if g.json {
        println!("{}", serde_json::to_string_pretty(p).context("Failed to serialise output")?);
        return Ok(());
    }
    if g.quiet {
        return Ok(());
    }
    let pages = p
        .page_count
        .map(|n| format!("{n} page(s)"))
        .unwrap_or_else(|| "editable".to_string());
    eprintln!(
        "{} {}  {}  {}",
        green("◆"),
        bold(p.artifact_id.as_str()),
        dim(&pages),
        p.url
    );
    if let Some(docsign::Fidelity::Reduced(ref note)) = p.fidelity {
        eprintln!("  {} reduced fidelity: {}", yellow("⚠"), note);
    }
    println!("{}", p.artifact_id);
    Ok(())
}

fn print_outcome(outcome: &SigningOutcome, g: &GlobalArgs) -> Result<()> {
    if g.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome.report()).context("Failed to serialise output")?
        );
        return Ok(());
    }
    if !g.quiet {
        let delivery = match outcome.delivery {
            DeliveryStatus::Delivered => green("delivered"),
            DeliveryStatus::Skipped => dim("not delivered (no agent configured)"),
            DeliveryStatus::Failed(ref e) => yellow(&format!("delivery failed: {e}")),
        };
        eprintln!(
            "{} {}  {}  {}",
            green("✔"),
            bold(outcome.signed_id.as_str()),
            outcome.url,
            delivery
        );
    }
    println!("{}", outcome.signed_id);
    Ok(())
}
