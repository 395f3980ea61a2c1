//! Sentinel daemon
//!
//! Serves the analysis engine over NDJSON on stdin/stdout. Each input line is
//! one client message; replies and streamed analysis events are written one
//! per line to stdout. Logs go to stderr.
//!
//! The process exits non-zero if the audit trail becomes unwritable.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Level};

use sentinel_core::{
    init_tracing, AnalysisEngine, AnalysisEvent, ClientMessage, EngineConfig, LogFormat,
    ServerMessage, VERSION,
};

#[derive(Parser)]
#[command(name = "sentineld")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sentinel analysis daemon (NDJSON over stdio)", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Policy file (overrides the config)
    #[arg(long, env = "SENTINEL_POLICY")]
    policy: Option<PathBuf>,

    /// Audit log path (overrides the config)
    #[arg(long)]
    audit_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if args.json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    init_tracing(format, level);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "sentineld failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.policy.is_some() {
        config.policy = args.policy;
    }
    if let Some(path) = args.audit_log {
        config.audit_log = path;
    }

    let engine = AnalysisEngine::open(config)
        .await
        .context("Failed to start analysis engine")?;
    info!(
        version = VERSION,
        workers = engine.config().workers,
        queue_capacity = engine.config().queue_capacity,
        audit_log = %engine.config().audit_log.display(),
        "sentineld ready"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    serve(&engine, stdin, tokio::io::stdout()).await?;

    if engine.is_halted() {
        error!("audit trail unwritable; exiting");
        return Ok(false);
    }
    Ok(true)
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    EndOfInput,
    Interrupted,
    Halted,
}

/// Serve client messages from `input` until it closes, the process is
/// interrupted, or the engine halts. Shuts the engine down before returning
/// and hands back the output once every pending message is written.
async fn serve<R, W>(engine: &AnalysisEngine, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(write_messages(rx, output));
    let run_failed = Arc::new(Notify::new());
    let mut forwarders = JoinSet::new();
    let mut lines = input.lines();

    let reason = loop {
        reap(&mut forwarders);
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = run_failed.notified() => {
                if engine.is_halted() {
                    break StopReason::Halted;
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => break StopReason::Interrupted,
        };
        let Some(line) = line else {
            break StopReason::EndOfInput;
        };
        if line.trim().is_empty() {
            continue;
        }

        match ClientMessage::parse_line(&line) {
            Ok(message) => {
                handle(engine, message, &tx, &mut forwarders, &run_failed).await;
            }
            Err(e) => {
                debug!(error = %e, "unparseable client message");
                let _ = tx.send(ServerMessage::error(format!("invalid message: {e}")));
            }
        }
        if engine.is_halted() {
            break StopReason::Halted;
        }
    };

    info!(reason = ?reason, "stopping");
    engine.shutdown(reason != StopReason::EndOfInput).await;
    while forwarders.join_next().await.is_some() {}
    drop(tx);
    let output = writer
        .await
        .context("stdout writer panicked")?
        .context("Failed to write to stdout")?;
    Ok(output)
}

/// Collect forwarders whose run has finished. Returns how many were reaped.
fn reap(forwarders: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(done) = forwarders.try_join_next() {
        if let Err(e) = done {
            warn!(error = %e, "event forwarder ended abnormally");
        }
        reaped += 1;
    }
    reaped
}

async fn handle(
    engine: &AnalysisEngine,
    message: ClientMessage,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    forwarders: &mut JoinSet<()>,
    run_failed: &Arc<Notify>,
) {
    let reply = match message {
        ClientMessage::Analyze(params) => {
            let declared_id = params.request_id.clone();
            let request = match params.into_request() {
                Ok(request) => request,
                Err(e) => {
                    let _ = tx.send(ServerMessage::rejected(declared_id, &e));
                    return;
                }
            };
            let request_id = request.id.clone();
            match engine.submit(request) {
                Ok(mut stream) => {
                    // Accepted goes out before any event of the run.
                    let _ = tx.send(ServerMessage::Accepted { request_id });
                    let tx = tx.clone();
                    let run_failed = Arc::clone(run_failed);
                    forwarders.spawn(async move {
                        while let Some(event) = stream.recv().await {
                            if matches!(event, AnalysisEvent::Failed { .. }) {
                                run_failed.notify_one();
                            }
                            if tx.send(event.into()).is_err() {
                                break;
                            }
                        }
                    });
                    return;
                }
                Err(e) => ServerMessage::rejected(Some(request_id), &e),
            }
        }
        ClientMessage::Cancel { request_id } => {
            let found = engine.cancel(&request_id);
            ServerMessage::Cancelled { request_id, found }
        }
        ClientMessage::Health => ServerMessage::Health(engine.health()),
        ClientMessage::ReloadPolicy { path } => {
            let reloaded = match path {
                Some(path) => engine.reload_policy_from(path).await,
                None => engine.reload_policy().await,
            };
            match reloaded {
                Ok(version) => ServerMessage::PolicyReloaded { version },
                Err(e) => {
                    warn!(error = %e, "policy reload failed");
                    ServerMessage::error(e.to_string())
                }
            }
        }
        ClientMessage::FixApplied(fix) => match engine.record_fix_applied(&fix).await {
            Ok(seq) => ServerMessage::Recorded { seq },
            Err(e) => ServerMessage::error(e.to_string()),
        },
        ClientMessage::Auth(event) => match engine.record_auth_event(&event).await {
            Ok(seq) => ServerMessage::Recorded { seq },
            Err(e) => ServerMessage::error(e.to_string()),
        },
    };
    let _ = tx.send(reply);
}

/// Single writer for stdout so lines from concurrent runs never interleave.
async fn write_messages<W>(
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut output: W,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "dropping unserializable message");
                continue;
            }
        };
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_audit::{AuditSink, MemoryAuditLog};
    use sentinel_core::{Capabilities, Policy, PolicyHandle};
    use serde_json::Value;

    async fn engine(sink: Arc<MemoryAuditLog>) -> AnalysisEngine {
        AnalysisEngine::start(
            EngineConfig::default(),
            PolicyHandle::new(Policy::builtin().unwrap()),
            Capabilities::builtin(1024 * 1024, 40),
            sink as Arc<dyn AuditSink>,
        )
        .await
        .unwrap()
    }

    fn parse_output(output: Vec<u8>) -> Vec<Value> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn of_type<'a>(messages: &'a [Value], kind: &str) -> Vec<&'a Value> {
        messages.iter().filter(|m| m["type"] == kind).collect()
    }

    #[tokio::test]
    async fn test_serve_answers_each_message_kind() {
        let sink = Arc::new(MemoryAuditLog::new());
        let engine = engine(Arc::clone(&sink)).await;
        let input = concat!(
            r#"{"type":"analyze","request_id":"d-1","path":"src/app.py","content":"import hashlib\nh = hashlib.md5(x)\n","mode":"local"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"type":"cancel","request_id":"nobody"}"#,
            "\n",
            r#"{"type":"health"}"#,
            "\n",
            r#"{"type":"auth","subject":"alice","action":"login"}"#,
            "\n",
        );

        let output = serve(&engine, input.as_bytes(), Vec::new()).await.unwrap();
        let messages = parse_output(output);

        assert_eq!(of_type(&messages, "accepted").len(), 1);
        assert_eq!(of_type(&messages, "error").len(), 1);
        let cancelled = of_type(&messages, "cancelled");
        assert_eq!(cancelled[0]["found"], false);
        assert_eq!(of_type(&messages, "health").len(), 1);
        assert_eq!(of_type(&messages, "recorded").len(), 1);

        let issues = of_type(&messages, "issue");
        assert!(issues.iter().any(|m| m["issue"]["kind"] == "weak-hash"));
        let completed = of_type(&messages, "completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0]["request_id"], "d-1");

        let accepted_at = messages.iter().position(|m| m["type"] == "accepted").unwrap();
        let first_issue_at = messages.iter().position(|m| m["type"] == "issue").unwrap();
        assert!(accepted_at < first_issue_at);
        assert!(!engine.is_halted());
    }

    #[tokio::test]
    async fn test_serve_rejects_hash_mismatch_with_request_id() {
        let sink = Arc::new(MemoryAuditLog::new());
        let engine = engine(sink).await;
        let input = concat!(
            r#"{"type":"analyze","request_id":"h-1","path":"a.py","content":"x = 1\n","content_hash":"00ff"}"#,
            "\n",
        );

        let messages = parse_output(serve(&engine, input.as_bytes(), Vec::new()).await.unwrap());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "rejected");
        assert_eq!(messages[0]["request_id"], "h-1");
        assert_eq!(messages[0]["code"], "hash_mismatch");
    }

    #[tokio::test]
    async fn test_serve_stops_when_audit_trail_fails() {
        let sink = Arc::new(MemoryAuditLog::failing_after(3));
        let engine = engine(sink).await;
        let input = concat!(
            r#"{"type":"analyze","request_id":"f-1","path":"src/app.py","content":"x = 1\n","mode":"local"}"#,
            "\n",
        );

        let messages = parse_output(serve(&engine, input.as_bytes(), Vec::new()).await.unwrap());
        assert!(engine.is_halted());
        let failed = of_type(&messages, "failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["request_id"], "f-1");
        assert!(of_type(&messages, "completed").is_empty());
    }

    #[tokio::test]
    async fn test_reap_collects_finished_forwarders() {
        let mut forwarders = JoinSet::new();
        for _ in 0..3 {
            forwarders.spawn(async {});
        }
        forwarders.spawn(std::future::pending::<()>());
        let mut reaped = 0;
        while reaped < 3 {
            reaped += reap(&mut forwarders);
            tokio::task::yield_now().await;
        }
        assert_eq!(reaped, 3);
        assert_eq!(forwarders.len(), 1);
        assert_eq!(reap(&mut forwarders), 0);
        forwarders.abort_all();
    }

    #[test]
    fn test_args_accept_overrides() {
        let args = Args::try_parse_from([
            "sentineld",
            "--policy",
            "p.toml",
            "--audit-log",
            "/tmp/a.jsonl",
        ])
        .unwrap();
        assert_eq!(args.policy, Some(PathBuf::from("p.toml")));
        assert_eq!(args.audit_log, Some(PathBuf::from("/tmp/a.jsonl")));
    }
}
