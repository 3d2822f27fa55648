mod archive;
mod config;
mod config_cmd;

use archive::{RunArchive, RunMetadata};
use clap::{Parser, Subcommand};
use config::{Config, ConfigPaths, ModelConfig};
use docket_core::generate::{CancelFlag, GenerateOptions, Generator, ModelSlot, ModelStatus};
use docket_core::ingest::{read_agenda_file, select_dates, select_included};
use docket_core::model::create_chat_model;
use docket_core::report::ReportDocument;
use docket_core::{AgendaRow, GenerationEvent, Report, SamplingParams};
use signal_hook::consts::SIGINT;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "docket", version, about = "council agenda report generator")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,

    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    Config(config_cmd::ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Agenda CSV export
    #[arg(value_name = "CSV")]
    csv: Option<PathBuf>,

    /// Meeting date to include, as written in the CSV (repeatable)
    #[arg(long = "date", value_name = "DD-Mon")]
    dates: Vec<String>,

    /// Include every row, not only those flagged for the summary
    #[arg(long)]
    all: bool,

    /// Drop [bracketed] text from item fields
    #[arg(long)]
    ignore_brackets: bool,

    /// Mirror raw model output, prompts and stats to stderr
    #[arg(long)]
    debug: bool,

    /// Model backend: local or server
    #[arg(long)]
    backend: Option<String>,

    /// Model override for the selected backend
    #[arg(long, value_name = "model")]
    model: Option<String>,

    /// Document output path
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct ResolvedRunArgs {
    csv: PathBuf,
    dates: Vec<String>,
    all: bool,
    strip_brackets: bool,
    debug: bool,
    model: ModelConfig,
    output: Option<PathBuf>,
}

impl RunArgs {
    fn resolve(
        self,
        config: &Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedRunArgs, String> {
        let csv = self
            .csv
            .ok_or_else(|| "missing agenda CSV path (see --help)".to_string())?;

        let mut model = config.model.clone();
        apply_env_overrides(&mut model, &lookup);

        let backend = self
            .backend
            .or_else(|| lookup("DOCKET_BACKEND"))
            .unwrap_or_else(|| model.active.clone());
        model.active = select_backend(&backend)?;

        if let Some(value) = lookup("DOCKET_BASE_URL") {
            model.active_profile_mut().base_url = value;
        }
        if let Some(value) = lookup("DOCKET_MODEL") {
            model.active_profile_mut().model = value;
        }
        if let Some(value) = self.model {
            model.active_profile_mut().model = value;
        }

        Ok(ResolvedRunArgs {
            csv,
            dates: self.dates,
            all: self.all,
            strip_brackets: self.ignore_brackets || config.prompts.ignore_brackets,
            debug: self.debug,
            model,
            output: self.output,
        })
    }
}

fn select_backend(value: &str) -> Result<String, String> {
    match value.trim() {
        "local" => Ok("local".to_string()),
        "server" => Ok("server".to_string()),
        other => Err(format!("backend must be local or server (got {other})")),
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn apply_env_overrides(model: &mut ModelConfig, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup("DOCKET_API_KEY") {
        model.server.api_key = value;
    }
    if model.local.base_url.trim().is_empty() {
        if let Some(value) = lookup("OLLAMA_BASE_URL") {
            model.local.base_url = value;
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "docket=debug,docket_core=debug"
    } else {
        "docket=info,docket_core=info"
    };
    let filter = EnvFilter::try_from_env("DOCKET_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = match ConfigPaths::from_home() {
        Ok(paths) => paths,
        Err(err) => {
            error!("config paths error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Command::Config(args)) = cli.command {
        if let Err(e) = config_cmd::run(&args, &paths) {
            error!("config failed: {e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let config = match Config::load_or_create(&paths).and_then(|config| {
        config.validate(&paths)?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => {
            error!("config load failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let run = match cli.run.resolve(&config, env_override) {
        Ok(run) => run,
        Err(err) => {
            error!("run args error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match execute(&run, &config, &paths) {
        Ok(RunExit::Completed) => ExitCode::SUCCESS,
        Ok(RunExit::Cancelled) => {
            info!("run cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

enum RunExit {
    Completed,
    Cancelled,
}

fn execute(run: &ResolvedRunArgs, config: &Config, paths: &ConfigPaths) -> Result<RunExit, String> {
    let rows = load_rows(run, config)?;
    let profile = run.model.active_profile().clone();
    info!(
        rows = rows.len(),
        provider = %profile.provider,
        model = %profile.model,
        "starting report"
    );

    let slot = ModelSlot::loading();
    let spec = profile.to_spec();
    slot.spawn_loader(move || create_chat_model(&spec))
        .map_err(|e| format!("model loader spawn failed: {e}"))?;
    let timeout = Duration::from_secs(run.model.load_timeout_secs);
    match slot.wait_ready(timeout) {
        ModelStatus::Ready => {}
        ModelStatus::Failed(reason) => return Err(format!("model unavailable: {reason}")),
        ModelStatus::Loading | ModelStatus::Busy => {
            return Err(format!(
                "model not ready after {}s (model.load_timeout_secs)",
                timeout.as_secs()
            ));
        }
    }

    let options = GenerateOptions {
        prompts: config.prompts.load(paths).map_err(|e| e.to_string())?,
        strip_brackets: run.strip_brackets,
        sampling: SamplingParams {
            max_tokens: run.model.max_tokens,
            ..SamplingParams::default()
        },
        debug_raw: run.debug,
    };
    let generator = Generator::new(slot, options);
    let handle = generator.generate(&rows).map_err(|e| e.to_string())?;
    let cancel = handle.cancel_flag();
    if let Err(err) = register_interrupt(&cancel) {
        warn!(error = %err, "ctrl-c handler unavailable");
    }

    let mut stdout = std::io::stdout().lock();
    let mut finished: Option<Result<Report, String>> = None;
    while let Some(event) = handle.recv() {
        match event {
            GenerationEvent::GroupStarted { index, date } => {
                debug!(index, date = %date, "meeting started");
            }
            GenerationEvent::Token(text) => {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            GenerationEvent::Raw(text) => {
                if run.debug {
                    eprint!("{text}");
                }
            }
            GenerationEvent::Completed(report) => finished = Some(Ok(report)),
            GenerationEvent::Failed(err) => finished = Some(Err(format!("generation failed: {err}"))),
        }
    }
    drop(stdout);

    // A cancelled worker may still be parked on a stalled stream read; leave it detached.
    if cancel.is_cancelled() {
        return Ok(RunExit::Cancelled);
    }
    if let Err(err) = handle.join() {
        return Err(err.to_string());
    }

    let report = match finished {
        Some(Ok(report)) => report,
        Some(Err(err)) => return Err(err),
        None => return Err("generation ended without a report".to_string()),
    };
    publish(run, config, paths, &report, &profile.provider, &profile.model)?;
    Ok(RunExit::Completed)
}

/// First ctrl-c cancels the run; a second one exits immediately with 130.
fn register_interrupt(cancel: &CancelFlag) -> std::io::Result<()> {
    signal_hook::flag::register_conditional_shutdown(
        SIGINT,
        i32::from(EXIT_CANCELLED),
        cancel.as_atomic(),
    )?;
    signal_hook::flag::register(SIGINT, cancel.as_atomic())?;
    Ok(())
}

fn load_rows(run: &ResolvedRunArgs, config: &Config) -> Result<Vec<AgendaRow>, String> {
    let columns = config.columns.to_column_map();
    let rows = read_agenda_file(&run.csv, &columns)
        .map_err(|e| format!("reading {}: {e}", run.csv.display()))?;
    let total = rows.len();
    let rows = if run.all { rows } else { select_included(rows) };
    let rows = select_dates(rows, &run.dates);
    debug!(total, selected = rows.len(), "agenda rows selected");
    if rows.is_empty() {
        return Err("no agenda rows match the selection".to_string());
    }
    Ok(rows)
}

fn publish(
    run: &ResolvedRunArgs,
    config: &Config,
    paths: &ConfigPaths,
    report: &Report,
    provider: &str,
    model: &str,
) -> Result<(), String> {
    let today = today();
    let document = ReportDocument::new(report, today);
    let output = output_path(
        run.output.as_deref(),
        config.output.export_dir(paths).as_deref(),
        today,
    );
    document
        .write_to(&output)
        .map_err(|e| format!("writing {}: {e}", output.display()))?;
    info!(path = %output.display(), "report written");

    let metadata = RunMetadata::new(&run.csv, report.dates.clone(), provider.into(), model.into())
        .map_err(|e| e.to_string())?;
    let archived = RunArchive::start(paths, metadata).and_then(|mut archive| {
        archive.finalize(&report.text, &document.render(), Some(&output))?;
        Ok(archive)
    });
    match archived {
        Ok(archive) => debug!(dir = %archive.dir().display(), "run archived"),
        Err(err) => warn!(error = %err, "run archive failed"),
    }
    Ok(())
}

fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

fn output_path(explicit: Option<&Path>, export_dir: Option<&Path>, today: Date) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let file_name = format!(
        "Council_Agenda_Summary_{:04}{:02}{:02}.md",
        today.year(),
        u8::from(today.month()),
        today.day()
    );
    match export_dir {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}
