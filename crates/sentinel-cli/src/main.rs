//! Sentinel CLI
//!
//! The `sentinel` command runs one-off analyses against an in-process engine
//! and inspects policy files and audit logs.
//!
//! ## Commands
//!
//! - `analyze`: analyze one file and print its event stream
//! - `index`: build a context index over a directory
//! - `policy check` / `policy explain`: validate a policy, show a route
//! - `audit verify` / `audit check` / `audit show`: inspect an audit log

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

use sentinel_audit::{read_log, verify_chain, AuditRecord};
use sentinel_core::context::{ContextScope, ContextStore, HashingEmbedder};
use sentinel_core::policy::file_is_sensitive;
use sentinel_core::{
    check_containment, classify, init_tracing, AnalysisEngine, AnalysisEvent, AnalysisRequest,
    AnalysisSummary, Disposition, EngineConfig, FileSnapshot, LogFormat, ModelMode, Policy,
    RequestId, UpdateOutcome,
};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local-first hybrid code analysis", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one file and print its events as NDJSON
    Analyze {
        /// File to analyze
        file: PathBuf,

        /// Where inference may run: local, cloud, or auto
        #[arg(short, long, default_value = "auto")]
        mode: ModelMode,

        /// Policy file (overrides the config)
        #[arg(long, env = "SENTINEL_POLICY")]
        policy: Option<PathBuf>,

        /// Audit log path (overrides the config)
        #[arg(long)]
        audit_log: Option<PathBuf>,

        /// Mark the file sensitive regardless of heuristics
        #[arg(long)]
        sensitive: bool,

        /// Print a human-readable report instead of NDJSON
        #[arg(long)]
        pretty: bool,
    },

    /// Index a directory into an in-memory context store
    Index {
        /// Directory to walk
        dir: PathBuf,

        /// Show the closest chunks for this file after indexing
        #[arg(long)]
        query: Option<PathBuf>,

        /// Number of chunks to show for --query
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// Policy file operations
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Audit log operations
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Parse and validate a policy file
    Check {
        /// Policy file
        file: PathBuf,
    },
    /// Show the route a file would receive
    Explain {
        /// File to classify
        file: PathBuf,

        /// Policy file (built-in policy when omitted)
        #[arg(long)]
        policy: Option<PathBuf>,

        #[arg(short, long, default_value = "auto")]
        mode: ModelMode,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the hash chain
    Verify {
        /// Audit log (JSON Lines)
        log: PathBuf,
    },
    /// Replay the log and check sensitive-request containment
    Check {
        /// Audit log (JSON Lines)
        log: PathBuf,
    },
    /// Print records, optionally for one request
    Show {
        /// Audit log (JSON Lines)
        log: PathBuf,

        #[arg(long)]
        request: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    init_tracing(format, level);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatch a command. `Ok(false)` means it ran but found a problem.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config;
    match cli.command {
        Commands::Analyze {
            file,
            mode,
            policy,
            audit_log,
            sensitive,
            pretty,
        } => {
            let mut config = load_config(config_path.as_deref())?;
            if policy.is_some() {
                config.policy = policy;
            }
            if let Some(path) = audit_log {
                config.audit_log = path;
            }
            cmd_analyze(config, &file, mode, sensitive, pretty).await
        }
        Commands::Index { dir, query, top_k } => {
            let config = load_config(config_path.as_deref())?;
            cmd_index(&config, &dir, query.as_deref(), top_k).await
        }
        Commands::Policy { action } => match action {
            PolicyAction::Check { file } => cmd_policy_check(&file),
            PolicyAction::Explain { file, policy, mode } => {
                cmd_policy_explain(&file, policy.as_deref(), mode)
            }
        },
        Commands::Audit { action } => match action {
            AuditAction::Verify { log } => cmd_audit_verify(&log),
            AuditAction::Check { log } => cmd_audit_check(&log),
            AuditAction::Show { log, request } => cmd_audit_show(&log, request.as_deref()),
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn read_snapshot(path: &Path) -> Result<FileSnapshot> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(FileSnapshot::new(path.to_string_lossy(), content))
}

async fn cmd_analyze(
    config: EngineConfig,
    file: &Path,
    mode: ModelMode,
    sensitive: bool,
    pretty: bool,
) -> Result<bool> {
    let snapshot = read_snapshot(file)?;
    let engine = AnalysisEngine::open(config)
        .await
        .context("Failed to start analysis engine")?;

    let mut request = AnalysisRequest::new(RequestId::generate(), snapshot, mode);
    if sensitive {
        request = request.with_sensitive_hint(true);
    }
    let mut stream = engine
        .submit(request)
        .map_err(|e| anyhow::anyhow!("request rejected: {e}"))?;

    let mut summary: Option<AnalysisSummary> = None;
    let mut failure: Option<String> = None;
    while let Some(event) = stream.recv().await {
        if !pretty {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            AnalysisEvent::Completed { summary: s, .. } => summary = Some(s),
            AnalysisEvent::Failed { error, .. } => failure = Some(error),
            AnalysisEvent::Issue { .. } => {}
        }
    }
    engine.shutdown(false).await;

    if let Some(error) = failure {
        bail!("analysis failed: {error}");
    }
    let summary = summary.context("event stream ended without a terminal event")?;
    if pretty {
        print_summary(&summary);
    }
    Ok(is_success(summary.disposition))
}

fn is_success(disposition: Disposition) -> bool {
    matches!(disposition, Disposition::Completed | Disposition::Degraded)
}

fn print_summary(summary: &AnalysisSummary) {
    println!(
        "{} ({} issues, {} ms)",
        summary.disposition,
        summary.issues.len(),
        summary.duration_ms
    );
    for stage in &summary.stages {
        let target = stage.target.map(|t| t.as_str()).unwrap_or("-");
        let status = format!("{:?}", stage.status).to_lowercase();
        print!(
            "  {:<18} {:<10} {:<6} {:>6} ms",
            stage.stage.as_str(),
            status,
            target,
            stage.elapsed_ms
        );
        match &stage.detail {
            Some(detail) => println!("  {detail}"),
            None => println!(),
        }
    }
    for issue in &summary.issues {
        println!(
            "{}:{}:{}: {} [{}] {}",
            issue.location.path,
            issue.location.line,
            issue.location.column,
            issue.severity,
            issue.kind,
            issue.message
        );
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
struct IndexStats {
    files: usize,
    indexed: usize,
    reused: usize,
    unchanged: usize,
    skipped: usize,
    /// Files classified sensitive; never offered as cloud context.
    sensitive: usize,
    chunks: usize,
}

/// Files under `dir`, skipping hidden entries and build output.
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory {}", current.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "target" || name == "node_modules" {
                continue;
            }
            let kind = entry.file_type()?;
            if kind.is_dir() {
                pending.push(entry.path());
            } else if kind.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

async fn cmd_index(
    config: &EngineConfig,
    dir: &Path,
    query: Option<&Path>,
    top_k: usize,
) -> Result<bool> {
    let store = ContextStore::new(
        Arc::new(HashingEmbedder::default()),
        config.context_chunk_lines,
    );
    let policy = match &config.policy {
        Some(path) => Policy::load(path)
            .with_context(|| format!("Policy {} is invalid", path.display()))?,
        None => Policy::builtin()?,
    };
    let stats = index_dir(&store, dir, config.max_file_bytes, &policy).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(query) = query {
        let snapshot = read_snapshot(query)?;
        for chunk in store.query(&snapshot, top_k, ContextScope::All).await? {
            println!(
                "{:.3}  {}:{}-{}",
                chunk.score, chunk.path, chunk.start_line, chunk.end_line
            );
        }
    }
    Ok(true)
}

async fn index_dir(
    store: &ContextStore,
    dir: &Path,
    max_file_bytes: u64,
    policy: &Policy,
) -> Result<IndexStats> {
    let mut stats = IndexStats::default();

    for path in walk_files(dir)? {
        let meta = std::fs::metadata(&path)?;
        if meta.len() > max_file_bytes {
            debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
            stats.skipped += 1;
            continue;
        }
        let snapshot = read_snapshot(&path)?;
        stats.files += 1;
        let sensitive = file_is_sensitive(&snapshot, policy);
        if sensitive {
            stats.sensitive += 1;
        }
        match store.update(&snapshot, sensitive).await? {
            UpdateOutcome::Indexed { chunks } => {
                stats.indexed += 1;
                stats.chunks += chunks;
            }
            UpdateOutcome::Reused { chunks } => {
                stats.reused += 1;
                stats.chunks += chunks;
            }
            UpdateOutcome::Unchanged => stats.unchanged += 1,
            UpdateOutcome::Skipped => stats.skipped += 1,
        }
    }
    Ok(stats)
}

fn cmd_policy_check(file: &Path) -> Result<bool> {
    let policy = Policy::load(file)
        .with_context(|| format!("Policy {} is invalid", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&policy.audit_payload())?);
    Ok(true)
}

fn cmd_policy_explain(file: &Path, policy: Option<&Path>, mode: ModelMode) -> Result<bool> {
    let policy = match policy {
        Some(path) => Policy::load(path)
            .with_context(|| format!("Policy {} is invalid", path.display()))?,
        None => Policy::builtin()?,
    };
    let request = AnalysisRequest::new(RequestId::new("explain"), read_snapshot(file)?, mode);
    let decision = classify(&request, &policy);
    println!("{}", serde_json::to_string_pretty(&decision.audit_payload())?);
    Ok(true)
}

fn load_records(log: &Path) -> Result<Vec<AuditRecord>> {
    read_log(log).with_context(|| format!("Failed to read audit log {}", log.display()))
}

fn cmd_audit_verify(log: &Path) -> Result<bool> {
    let records = load_records(log)?;
    match verify_chain(&records) {
        Ok(()) => {
            println!("ok: {} records, chain intact", records.len());
            Ok(true)
        }
        Err(brk) => {
            println!("broken at seq {}: {}", brk.seq, brk.reason);
            Ok(false)
        }
    }
}

fn cmd_audit_check(log: &Path) -> Result<bool> {
    let records = load_records(log)?;
    let report = check_containment(&records);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_clean())
}

fn cmd_audit_show(log: &Path, request: Option<&str>) -> Result<bool> {
    let records = load_records(log)?;
    for record in records
        .iter()
        .filter(|r| request.is_none() || r.request_id.as_deref() == request)
    {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_files_skips_hidden_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("src/nested/b.py"), "y = 2\n").unwrap();
        std::fs::write(dir.path().join(".git/config"), "[core]\n").unwrap();
        std::fs::write(dir.path().join("target/out.bin"), "bin").unwrap();

        let files = walk_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "py"));
    }

    #[tokio::test]
    async fn test_index_dir_reuses_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "import os\nos.getcwd()\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "import os\nos.getcwd()\n").unwrap();
        std::fs::write(dir.path().join("big.py"), vec![b'x'; 64]).unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 159, 146, 150]).unwrap();

        let store = ContextStore::new(Arc::new(HashingEmbedder::default()), 40);
        let policy = Policy::builtin().unwrap();
        let stats = index_dir(&store, dir.path(), 32, &policy).await.unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.skipped, 2);

        // A second pass sees every path at its indexed hash.
        let again = index_dir(&store, dir.path(), 32, &policy).await.unwrap();
        assert_eq!(again.unchanged, 2);
        assert_eq!(again.sensitive, 1);
    }

    #[test]
    fn test_audit_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.jsonl");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            use sentinel_audit::{AuditEntry, AuditKind, AuditSink, JsonlAuditLog};
            let sink = JsonlAuditLog::open(&log).await.unwrap();
            for i in 0..3 {
                sink.append(AuditEntry::new(
                    AuditKind::AuthEvent,
                    serde_json::json!({ "subject": format!("user-{i}") }),
                ))
                .await
                .unwrap();
            }
        });
        assert!(cmd_audit_verify(&log).unwrap());
        assert!(cmd_audit_check(&log).unwrap());

        let text = std::fs::read_to_string(&log).unwrap();
        std::fs::write(&log, text.replace("user-1", "mallory")).unwrap();
        assert!(!cmd_audit_verify(&log).unwrap());
    }

    #[test]
    fn test_degraded_runs_count_as_success() {
        assert!(is_success(Disposition::Completed));
        assert!(is_success(Disposition::Degraded));
        assert!(!is_success(Disposition::PolicyViolation));
        assert!(!is_success(Disposition::Cancelled));
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from(["sentinel", "--json", "audit", "show", "log.jsonl"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Audit {
                action: AuditAction::Show { request: None, .. }
            }
        ));

        let cli = Cli::try_parse_from(["sentinel", "analyze", "a.py", "--mode", "local"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Analyze {
                mode: ModelMode::Local,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["sentinel", "analyze", "a.py", "--mode", "mars"]).is_err());
    }
}
