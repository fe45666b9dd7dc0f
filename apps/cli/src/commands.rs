//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use ragkb_core::{
    Binder, ComponentRegistry, ProgressReporter, RunControl, read_dataset, run_evaluation,
    run_ingestion,
};
use ragkb_shared::{
    Environment, PipelineConfiguration, ProviderConfig, RagKbError, ResolvedConfiguration,
    RunState, SecretBundle, Trigger, default_config_path, default_secrets_path, load_document,
    resolve, secret_key,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::progress::CliProgress;

/// Crates whose spans and events the verbosity flag controls.
const LOG_TARGETS: &[&str] = &[
    "ragkb",
    "ragkb_core",
    "ragkb_shared",
    "ragkb_datasources",
    "ragkb_markdown",
    "ragkb_providers",
    "ragkb_storage",
];

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ragkb: ingest knowledge sources into a vector store and query them.
#[derive(Parser)]
#[command(
    name = "ragkb",
    version,
    about = "Ingest knowledge sources into a vector store and answer questions over them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Environment selecting the configuration and secrets files.
    #[arg(long, default_value = "local", env = "RAGKB_ENVIRONMENT", global = true)]
    pub environment: Environment,

    /// Configuration document (defaults to configurations/configuration.<env>.toml).
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Secrets dotenv file (defaults to configurations/secrets.<env>.env).
    #[arg(long, global = true)]
    pub secrets_file: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the ingestion pipeline into the configured collection.
    Ingest,

    /// Ask questions over the ingested collection, one per line.
    Chat,

    /// Answer an evaluation dataset and write records for scoring.
    Evaluate {
        /// JSONL dataset of {question, ground_truth?} records.
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Output JSONL file for evaluation records.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the configuration for the selected environment.
    Show {
        /// Output format.
        #[arg(long, default_value = "toml")]
        format: ShowFormat,
    },
    /// List the registered providers per axis.
    Providers,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum ShowFormat {
    Toml,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Filter used when `RUST_LOG` is unset: `-v` wins over the configured level.
fn default_filter(verbose: u8, configured: Option<&str>) -> String {
    let level = match verbose {
        0 => configured.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize tracing based on CLI flags and the document's log level.
fn init_tracing(cli: &Cli, configured: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose, configured)));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// One-line rendering of a failed command: `error[<Kind>]: <message>`.
pub(crate) fn render_error(report: &Report) -> String {
    match report.downcast_ref::<RagKbError>() {
        Some(e) => format!("error[{}]: {e}", e.kind()),
        None => format!("error: {report}"),
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Paths and environment shared by every command.
struct Context {
    environment: Environment,
    secrets_path: PathBuf,
}

impl Context {
    fn secrets(&self) -> Result<SecretBundle> {
        Ok(SecretBundle::load(Some(&self.secrets_path))?)
    }

    fn resolve(&self, document: &PipelineConfiguration, trigger: Trigger) -> Result<ResolvedConfiguration> {
        let secrets = self.secrets()?;
        let resolved = resolve(document, self.environment, &secrets, trigger)?;
        info!(
            build = %resolved.metadata.build_name,
            environment = %resolved.environment,
            trigger = trigger.as_str(),
            "configuration resolved"
        );
        Ok(resolved)
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config_file
        .clone()
        .unwrap_or_else(|| default_config_path(cli.environment));
    let ctx = Context {
        environment: cli.environment,
        secrets_path: cli
            .secrets_file
            .clone()
            .unwrap_or_else(|| default_secrets_path(cli.environment)),
    };

    // The document's log level feeds the tracing filter, so load it first.
    let document = load_document(&config_path);
    init_tracing(
        &cli,
        document.as_ref().ok().map(|d| d.metadata.log_level.as_str()),
    );

    match cli.command {
        Command::Config {
            action: ConfigAction::Providers,
        } => cmd_config_providers(),
        Command::Config {
            action: ConfigAction::Show { format },
        } => cmd_config_show(&ctx, document?, &format),
        Command::Ingest => cmd_ingest(&ctx, &document?).await,
        Command::Chat => cmd_chat(&ctx, &document?).await,
        Command::Evaluate { dataset, output } => {
            cmd_evaluate(&ctx, &document?, dataset, output).await
        }
    }
}

/// Cancel `RunControl` on the first Ctrl-C.
fn cancel_on_ctrl_c() -> Arc<RunControl> {
    let control = Arc::new(RunControl::new());
    let handle = Arc::clone(&control);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next batch boundary");
            handle.cancel();
        }
    });
    control
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

async fn cmd_ingest(ctx: &Context, document: &PipelineConfiguration) -> Result<()> {
    let reporter = CliProgress::new();
    reporter.phase(RunState::Configuring);
    let registry = ComponentRegistry::builtin();
    let bound = ctx.resolve(document, Trigger::Ingest).and_then(|resolved| {
        reporter.phase(RunState::Binding);
        Ok(Binder::new(&registry).bind_ingestion(&resolved.ingestion)?)
    });
    let components = match bound {
        Ok(components) => components,
        Err(e) => {
            reporter.phase(RunState::Failed);
            return Err(e);
        }
    };
    let collection = components.vector_store.collection_name().to_string();

    let control = cancel_on_ctrl_c();
    // The pipeline reports `Failed` itself.
    let report = run_ingestion(&components, &control, &reporter).await?;

    println!();
    match report.state {
        RunState::Skipped => {
            println!("  Collection '{collection}' already exists, nothing ingested.");
            println!("  Delete the collection to ingest again.");
        }
        _ => {
            println!("  Ingestion completed!");
            println!("  Collection: {collection}");
            println!("  Documents:  {} ({} after cleaning)", report.documents, report.cleaned_documents);
            println!("  Chunks:     {}", report.chunks);
            println!("  Vectors:    {}", report.vectors_written);
            for failed in &report.failed_sources {
                println!("  Failed:     {} [{}] {}", failed.name, failed.kind, failed.message);
            }
        }
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_chat(ctx: &Context, document: &PipelineConfiguration) -> Result<()> {
    let resolved = ctx.resolve(document, Trigger::Chat)?;
    let registry = ComponentRegistry::builtin();
    let components = Binder::new(&registry).bind_augmentation(&resolved)?;
    let engine = &components.query_engine;

    println!(
        "ragkb chat over '{}'. Type a question, or 'exit' to quit.",
        resolved.ingestion.vector_store.config.collection_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match engine.query(question).await {
            Ok(response) => {
                println!("{}", response.answer);
                let urls = response.source_urls();
                if !urls.is_empty() {
                    println!();
                    println!("Sources:");
                    for url in urls {
                        println!("  - {url}");
                    }
                }
                println!();
            }
            Err(e) => eprintln!("error[{}]: {e}", e.kind()),
        }
    }

    Ok(())
}

async fn cmd_evaluate(
    ctx: &Context,
    document: &PipelineConfiguration,
    dataset: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let resolved = ctx.resolve(document, Trigger::Evaluate)?;
    let stage = resolved
        .evaluation
        .as_ref()
        .ok_or_else(|| RagKbError::configuration("evaluation stage is not configured"))?;

    let dataset = dataset
        .or_else(|| stage.config.dataset_path.clone())
        .ok_or_else(|| {
            RagKbError::configuration(
                "no dataset: pass --dataset or set pipeline.evaluation.dataset_path",
            )
        })?;
    let output = output
        .or_else(|| stage.config.output_path.clone())
        .unwrap_or_else(|| {
            PathBuf::from("var")
                .join("evaluation")
                .join(format!("{}.jsonl", resolved.metadata.build_name))
        });

    let samples = read_dataset(&dataset)?;
    info!(dataset = %dataset.display(), samples = samples.len(), "dataset loaded");

    let registry = ComponentRegistry::builtin();
    let components = Binder::new(&registry).bind_evaluation(&resolved)?;
    let control = cancel_on_ctrl_c();
    let summary = run_evaluation(&components, &samples, &output, &control).await?;

    println!();
    println!("  Evaluation records written!");
    println!("  Samples: {}", summary.samples);
    println!("  Written: {}", summary.written);
    println!("  Failed:  {}", summary.failed);
    println!("  Output:  {}", summary.output.display());
    println!("  Time:    {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Config inspection
// ---------------------------------------------------------------------------

/// Presence of one secret key the document's providers read.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretStatus {
    required: bool,
    present: bool,
}

impl SecretStatus {
    fn label(&self) -> &'static str {
        match (self.present, self.required) {
            (true, _) => "present",
            (false, true) => "absent (required)",
            (false, false) => "absent",
        }
    }
}

fn collect_secrets<T: ProviderConfig>(
    config: &T,
    bundle: &SecretBundle,
    out: &mut BTreeMap<String, SecretStatus>,
) {
    for field in config.secret_fields() {
        let key = secret_key(T::AXIS, config.discriminant(), field.name);
        let present = bundle.get(&key).is_some();
        let status = out.entry(key).or_insert(SecretStatus {
            required: false,
            present,
        });
        status.required |= field.required;
    }
}

/// Every secret key the document's providers read, with its status.
fn secret_status(
    document: &PipelineConfiguration,
    bundle: &SecretBundle,
) -> BTreeMap<String, SecretStatus> {
    let stages = &document.pipeline;
    let mut out = BTreeMap::new();
    for datasource in &stages.ingestion.datasources {
        collect_secrets(datasource, bundle, &mut out);
    }
    collect_secrets(&stages.ingestion.embedding_model, bundle, &mut out);
    collect_secrets(&stages.ingestion.vector_store, bundle, &mut out);
    if let Some(augmentation) = &stages.augmentation {
        collect_secrets(&augmentation.query_engine.retriever.llm, bundle, &mut out);
        collect_secrets(&augmentation.query_engine.synthesizer.llm, bundle, &mut out);
    }
    if let Some(evaluation) = &stages.evaluation {
        collect_secrets(&evaluation.judge_llm, bundle, &mut out);
        collect_secrets(&evaluation.judge_embedding_model, bundle, &mut out);
    }
    out
}

fn cmd_config_show(ctx: &Context, mut document: PipelineConfiguration, format: &ShowFormat) -> Result<()> {
    document.metadata.environment = ctx.environment;
    let secrets = secret_status(&document, &ctx.secrets()?);

    match format {
        ShowFormat::Toml => {
            println!("{}", toml::to_string_pretty(&document)?);
            if !secrets.is_empty() {
                println!("[secrets]");
                for (key, status) in &secrets {
                    println!("{key} = \"{}\"", status.label());
                }
            }
        }
        ShowFormat::Json => {
            let secrets: BTreeMap<&str, &str> = secrets
                .iter()
                .map(|(key, status)| (key.as_str(), status.label()))
                .collect();
            let value = serde_json::json!({
                "configuration": document,
                "secrets": secrets,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn cmd_config_providers() -> Result<()> {
    let registry = ComponentRegistry::builtin();
    println!("{:<16} {:<14} {:<10} REQUIRES", "AXIS", "PROVIDER", "VALIDATOR");
    for entry in registry.entries() {
        let requires = if entry.requires.is_empty() {
            "-".to_string()
        } else {
            entry
                .requires
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let validator = if entry.validator.is_some() { "yes" } else { "-" };
        println!(
            "{:<16} {:<14} {:<10} {requires}",
            entry.axis.as_str(),
            entry.discriminant,
            validator
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ragkb_shared::{DocumentFormat, parse_document};

    const DOCUMENT: &str = r#"
[metadata]
build_name = "ragkb-cli-test"
log_level = "warn"

[[pipeline.ingestion.datasources]]
name = "confluence"
host = "wiki.example.com"

[[pipeline.ingestion.datasources]]
name = "hackernews"

[pipeline.ingestion.embedding_model]
provider = "openai"
name = "text-embedding-3-small"

[pipeline.ingestion.vector_store]
name = "qdrant"
collection_name = "kb"

[pipeline.ingestion.vector_store.ports]
rest = 6333

[pipeline.augmentation.query_engine.retriever.llm]
provider = "openai_like"
name = "llama-3.1-8b"

[pipeline.augmentation.query_engine.synthesizer.llm]
provider = "openai"
name = "gpt-4o-mini"
"#;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ragkb",
            "evaluate",
            "--environment",
            "dev",
            "--dataset",
            "qa.jsonl",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.environment, Environment::Dev);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Evaluate { dataset, output } => {
                assert_eq!(dataset, Some(PathBuf::from("qa.jsonl")));
                assert_eq!(output, None);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn rejects_unknown_environment() {
        assert!(Cli::try_parse_from(["ragkb", "--environment", "staging", "ingest"]).is_err());
    }

    #[test]
    fn verbosity_overrides_configured_level() {
        assert!(default_filter(0, Some("warn")).contains("ragkb_core=warn"));
        assert!(default_filter(0, None).contains("ragkb_core=info"));
        assert!(default_filter(1, Some("warn")).contains("ragkb_core=debug"));
        assert!(default_filter(3, Some("warn")).contains("ragkb_storage=trace"));
    }

    #[test]
    fn renders_error_kind() {
        let report = Report::new(RagKbError::MissingSecret {
            key: "RAG__LLMS__OPENAI__API_KEY".into(),
        });
        let line = render_error(&report);
        assert!(line.starts_with("error[MissingSecretError]: "), "{line}");
        assert!(line.contains("RAG__LLMS__OPENAI__API_KEY"));

        let other = render_error(&color_eyre::eyre::eyre!("boom"));
        assert_eq!(other, "error: boom");
    }

    #[test]
    fn secret_status_lists_keys_without_values() {
        let document = parse_document(DOCUMENT, DocumentFormat::Toml).unwrap();
        let bundle = SecretBundle::from_pairs([
            ("RAG__DATASOURCES__CONFLUENCE__USERNAME", "bot"),
            ("RAG__LLMS__OPENAI__API_KEY", "sk-secret"),
        ]);

        let status = secret_status(&document, &bundle);
        let labels: Vec<(&str, &str)> = status
            .iter()
            .map(|(k, s)| (k.as_str(), s.label()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("RAG__DATASOURCES__CONFLUENCE__PASSWORD", "absent (required)"),
                ("RAG__DATASOURCES__CONFLUENCE__USERNAME", "present"),
                ("RAG__EMBEDDING_MODELS__OPENAI__API_KEY", "absent (required)"),
                ("RAG__LLMS__OPENAI_LIKE__API_BASE", "absent (required)"),
                ("RAG__LLMS__OPENAI_LIKE__API_KEY", "absent"),
                ("RAG__LLMS__OPENAI__API_KEY", "present"),
                ("RAG__VECTOR_STORES__QDRANT__API_KEY", "absent"),
            ]
        );
    }
}
