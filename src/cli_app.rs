//! Top-level CLI definition and dispatch.

use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use defect_ledger::core::config::{Config, StoreBackend};
use defect_ledger::core::errors::DlError;
use defect_ledger::fingerprint::generator::{Fingerprint, Fingerprinter};
use defect_ledger::ledger::memory::MemoryStore;
use defect_ledger::ledger::model::{BugRecord, Report, Severity};
use defect_ledger::ledger::recorder::DedupEngine;
use defect_ledger::ledger::sqlite::SqliteStore;
use defect_ledger::ledger::store::BugStore;
use defect_ledger::logger::channel::{LedgerEvent, LedgerLoggerHandle, spawn_logger};

/// Defect ledger: fingerprints and deduplicates simulation defect reports.
#[derive(Debug, Parser)]
#[command(
    name = "dledger",
    author,
    version,
    about = "Defect ledger - fingerprint and deduplicate simulation defects",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Record defect reports (JSONL) into the ledger.
    Record(InputArgs),
    /// Print fingerprints for defect reports without recording them.
    Fingerprint(InputArgs),
    /// List recorded bugs, most frequent first.
    List(ListArgs),
    /// Show one bug record.
    Show(ShowArgs),
    /// Link a bug record to an external tracker id.
    MarkSynced(MarkSyncedArgs),
    /// Show ledger-wide statistics.
    Stats,
    /// Show the subjects implicated in the most occurrences.
    Subjects(SubjectsArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct InputArgs {
    /// JSONL file of `{"occurrence": .., "context": ..}` lines (stdin if omitted or `-`).
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    /// Only records not yet linked to an external tracker.
    #[arg(long)]
    unsynced: bool,
    /// Maximum rows (defaults to `query.default_top_n`).
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct ShowArgs {
    /// 8-character fingerprint.
    fingerprint: String,
}

#[derive(Debug, Clone, Args)]
struct MarkSyncedArgs {
    /// 8-character fingerprint.
    fingerprint: String,
    /// Issue id in the external tracker.
    external_id: String,
}

#[derive(Debug, Clone, Args)]
struct SubjectsArgs {
    /// Maximum rows (defaults to `query.default_top_n`).
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<DlError> for CliError {
    fn from(err: DlError) -> Self {
        match err {
            DlError::InvalidConfig { .. }
            | DlError::MissingConfig { .. }
            | DlError::ConfigParse { .. }
            | DlError::InvalidInput { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Record(args) => run_record(cli, args),
        Command::Fingerprint(args) => run_fingerprint(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Show(args) => run_show(cli, args),
        Command::MarkSynced(args) => run_mark_synced(cli, args),
        Command::Stats => run_stats(cli),
        Command::Subjects(args) => run_subjects(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── session ────────────────────

/// Open ledger plus (optionally) the logger thread for one command.
struct Session {
    config: Config,
    engine: DedupEngine,
    logger: Option<(LedgerLoggerHandle, JoinHandle<()>)>,
    started: Instant,
    recorded: u64,
}

impl Session {
    fn open(cli: &Cli, with_logger: bool) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;

        let store: Arc<dyn BugStore> = match config.store.backend {
            StoreBackend::Sqlite => Arc::new(SqliteStore::open_with_timeout(
                &config.store.sqlite_db,
                config.store.busy_timeout_ms,
            )?),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let fingerprinter = Fingerprinter::new(config.taxonomy()?);
        let mut engine = DedupEngine::new(Arc::clone(&store), fingerprinter)
            .with_most_frequent_n(config.query.most_frequent_n);

        let logger = if with_logger && config.logging.enabled {
            let (handle, join) = spawn_logger(config.logger_config())?;
            handle.send(LedgerEvent::SessionStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                backend: store.backend_name().to_string(),
                config_hash: config.stable_hash()?,
            });
            engine = engine.with_logger(handle.clone());
            Some((handle, join))
        } else {
            None
        };

        Ok(Self {
            config,
            engine,
            logger,
            started: Instant::now(),
            recorded: 0,
        })
    }

    fn top_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.query.default_top_n)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some((handle, join)) = self.logger.take() {
            handle.send(LedgerEvent::SessionStopped {
                recorded: self.recorded,
                uptime_secs: self.started.elapsed().as_secs(),
            });
            handle.shutdown();
            let _ = join.join();
        }
    }
}

// ──────────────────── report input ────────────────────

/// Read JSONL reports. Blank lines are skipped; malformed lines come back as
/// `InvalidInput` errors tagged with their line number.
fn read_reports<R: BufRead>(
    reader: R,
    source: &str,
) -> io::Result<Vec<Result<(usize, Report), DlError>>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(
            serde_json::from_str::<Report>(trimmed)
                .map(|report| (line_no, report))
                .map_err(|e| DlError::InvalidInput {
                    location: format!("{source}:{line_no}"),
                    details: e.to_string(),
                }),
        );
    }
    Ok(out)
}

fn open_input(file: Option<&Path>) -> Result<(Box<dyn BufRead>, String), CliError> {
    match file {
        None => Ok((Box::new(io::stdin().lock()), "<stdin>".to_string())),
        Some(path) if path == Path::new("-") => {
            Ok((Box::new(io::stdin().lock()), "<stdin>".to_string()))
        }
        Some(path) => {
            let file = File::open(path).map_err(|e| {
                CliError::User(format!("cannot open {}: {e}", path.display()))
            })?;
            Ok((Box::new(BufReader::new(file)), path.display().to_string()))
        }
    }
}

fn load_reports(args: &InputArgs) -> Result<(Vec<(usize, Report)>, Vec<DlError>), CliError> {
    let (reader, source) = open_input(args.file.as_deref())?;
    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for item in read_reports(reader, &source)? {
        match item {
            Ok(report) => reports.push(report),
            Err(err) => errors.push(err),
        }
    }
    Ok((reports, errors))
}

/// Malformed lines fail the command: partially when some lines succeeded.
fn input_errors_outcome(processed: usize, errors: &[DlError]) -> Result<(), CliError> {
    if errors.is_empty() {
        return Ok(());
    }
    for err in errors {
        eprintln!("dledger: {err}");
    }
    let msg = format!("{} malformed report line(s) skipped", errors.len());
    if processed > 0 {
        Err(CliError::Partial(msg))
    } else {
        Err(CliError::User(msg))
    }
}

// ──────────────────── commands ────────────────────

fn run_record(cli: &Cli, args: &InputArgs) -> Result<(), CliError> {
    let (reports, errors) = load_reports(args)?;
    let mut session = Session::open(cli, true)?;
    let mode = output_mode(cli);

    let mut created = 0_u64;
    let mut results = Vec::with_capacity(reports.len());
    for (line_no, report) in &reports {
        let outcome = session.engine.record(&report.occurrence, &report.context)?;
        session.recorded += 1;
        if outcome.created {
            created += 1;
        }
        let record = &outcome.record;
        match mode {
            OutputMode::Human => {
                let tag = if outcome.created {
                    "new   ".green()
                } else {
                    "merged".normal()
                };
                println!(
                    "{tag} {} x{:<5} {}  {}",
                    record.fingerprint,
                    record.occurrence_count,
                    paint_severity(record.severity, &format!("{:<8}", record.severity.as_str())),
                    record.defect_type
                );
            }
            OutputMode::Json => results.push(json!({
                "line": line_no,
                "fingerprint": record.fingerprint,
                "created": outcome.created,
                "occurrence_count": record.occurrence_count,
                "defect_type": record.defect_type,
                "category": record.category,
            })),
        }
    }

    let merged = session.recorded - created;
    match mode {
        OutputMode::Human => {
            println!(
                "Recorded {} occurrence(s): {created} new, {merged} merged.",
                session.recorded
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "record",
                "recorded": session.recorded,
                "created": created,
                "merged": merged,
                "errors": errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "results": results,
            });
            write_json_line(&payload)?;
        }
    }

    input_errors_outcome(reports.len(), &errors)
}

fn run_fingerprint(cli: &Cli, args: &InputArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let fingerprinter = Fingerprinter::new(config.taxonomy()?);
    let (reports, errors) = load_reports(args)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for (_, report) in &reports {
                let analysis = fingerprinter.analyze(&report.occurrence, &report.context);
                println!("{}  {}", analysis.fingerprint.as_str().bold(), analysis.description);
            }
        }
        OutputMode::Json => {
            let results: Vec<Value> = reports
                .iter()
                .map(|(line_no, report)| {
                    let analysis = fingerprinter.analyze(&report.occurrence, &report.context);
                    json!({"line": line_no, "analysis": analysis})
                })
                .collect();
            let payload = json!({
                "command": "fingerprint",
                "errors": errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "results": results,
            });
            write_json_line(&payload)?;
        }
    }

    input_errors_outcome(reports.len(), &errors)
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let session = Session::open(cli, false)?;
    let query = session.engine.query();
    let limit = session.top_limit(args.top);
    let (records, total) = if args.unsynced {
        let mut records = query.unsynced()?;
        let total = records.len();
        records.truncate(limit);
        (records, total)
    } else {
        let total = session.engine.store().list_records()?.len();
        (query.top_n(limit)?, total)
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if records.is_empty() {
                println!("No bugs recorded.");
                return Ok(());
            }
            println!(
                "{}",
                format!(
                    "{:<8}  {:>7}  {:<8}  {:<17}  {:<24}  {}",
                    "FP", "COUNT", "SEVERITY", "CATEGORY", "TYPE", "SYNCED"
                )
                .bold()
            );
            for r in &records {
                println!(
                    "{:<8}  {:>7}  {}  {:<17}  {:<24}  {}",
                    r.fingerprint,
                    r.occurrence_count,
                    paint_severity(r.severity, &format!("{:<8}", r.severity.as_str())),
                    r.category,
                    r.defect_type,
                    r.synced_to.as_deref().unwrap_or("-")
                );
            }
            if total > records.len() {
                println!("  ... {} more (use --top)", total - records.len());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "unsynced_only": args.unsynced,
                "total": total,
                "records": records,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn parse_fingerprint_arg(raw: &str) -> Result<Fingerprint, CliError> {
    Fingerprint::parse(raw).ok_or_else(|| {
        CliError::User(format!(
            "invalid fingerprint {raw:?}: expected 8 lowercase hex characters"
        ))
    })
}

fn run_show(cli: &Cli, args: &ShowArgs) -> Result<(), CliError> {
    let fp = parse_fingerprint_arg(&args.fingerprint)?;
    let session = Session::open(cli, false)?;
    let Some(record) = session.engine.query().by_fingerprint(fp.as_str())? else {
        return Err(CliError::User(format!("no bug recorded with fingerprint {fp}")));
    };

    match output_mode(cli) {
        OutputMode::Human => print_record(&record),
        OutputMode::Json => {
            let payload = json!({"command": "show", "record": record});
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_record(r: &BugRecord) {
    println!("{} {}", "Bug".bold(), r.fingerprint.as_str().bold());
    println!("  Type:        {}", r.defect_type);
    println!("  Category:    {}", r.category);
    println!("  Severity:    {}", paint_severity(r.severity, r.severity.as_str()));
    println!("  Occurrences: {}", r.occurrence_count);
    println!("  First seen:  {}", r.first_seen_at.to_rfc3339());
    println!("  Last seen:   {}", r.last_seen_at.to_rfc3339());
    println!("  Identity:    {}", r.fingerprint_components);
    if !r.message.is_empty() {
        println!("  Message:     {}", r.message);
    }
    let ctx = &r.context;
    println!(
        "  Context:     action={} phase={} turn={}",
        ctx.action_type.as_deref().unwrap_or("-"),
        ctx.phase.as_deref().unwrap_or("-"),
        ctx.turn.map_or_else(|| "-".to_string(), |t| t.to_string())
    );
    println!("  Synced to:   {}", r.synced_to.as_deref().unwrap_or("(pending)"));
}

fn run_mark_synced(cli: &Cli, args: &MarkSyncedArgs) -> Result<(), CliError> {
    let fp = parse_fingerprint_arg(&args.fingerprint)?;
    if args.external_id.trim().is_empty() {
        return Err(CliError::User("external id must not be empty".to_string()));
    }
    let session = Session::open(cli, true)?;
    let updated = session
        .engine
        .query()
        .mark_synced(fp.as_str(), args.external_id.trim())?;
    if !updated {
        return Err(CliError::User(format!("no bug recorded with fingerprint {fp}")));
    }

    match output_mode(cli) {
        OutputMode::Human => println!("Marked {fp} as synced to {}.", args.external_id.trim()),
        OutputMode::Json => {
            let payload = json!({
                "command": "mark-synced",
                "fingerprint": fp,
                "external_id": args.external_id.trim(),
                "updated": true,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_stats(cli: &Cli) -> Result<(), CliError> {
    let session = Session::open(cli, false)?;
    let query = session.engine.query();

    match output_mode(cli) {
        OutputMode::Human => {
            let stats = query.stats()?;
            println!("{}", "Defect ledger".bold());
            println!("  Unique bugs:       {}", stats.unique_bugs);
            println!("  Total occurrences: {}", stats.total_occurrences);
            if stats.unique_bugs == 0 {
                return Ok(());
            }
            println!();
            println!("{}", "By category".bold());
            for (label, stat) in &stats.by_category {
                println!(
                    "  {label:<18} {:>5} bugs  {:>7} occurrences",
                    stat.count, stat.occurrences
                );
            }
            println!();
            println!("{}", "By severity (occurrences)".bold());
            for (label, occurrences) in &stats.by_severity {
                let painted = Severity::from_label(label)
                    .map_or_else(|| label.normal(), |sev| paint_severity(sev, label));
                println!("  {painted:<18} {occurrences:>7}");
            }
            println!();
            println!("{}", "Most frequent".bold());
            for r in &stats.most_frequent {
                println!(
                    "  {}  x{:<6} {}",
                    r.fingerprint, r.occurrence_count, r.fingerprint_components
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({"command": "stats", "stats": query.export_json()?});
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_subjects(cli: &Cli, args: &SubjectsArgs) -> Result<(), CliError> {
    let session = Session::open(cli, false)?;
    let subjects = session
        .engine
        .query()
        .top_subjects(session.top_limit(args.top))?;

    match output_mode(cli) {
        OutputMode::Human => {
            if subjects.is_empty() {
                println!("No subjects recorded.");
            }
            for s in &subjects {
                println!("  {:>7}  {}", s.occurrences, s.subject);
            }
        }
        OutputMode::Json => {
            let payload = json!({"command": "subjects", "subjects": subjects});
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User("configuration validation failed".to_string()))
            }
        },
    }
}

// ──────────────────── output helpers ────────────────────

fn paint_severity(severity: Severity, text: &str) -> ColoredString {
    match severity {
        Severity::Critical => text.red().bold(),
        Severity::High => text.red(),
        Severity::Medium => text.yellow(),
        Severity::Low => text.normal(),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DLEDGER_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
