//! Pipeline coordinator.
//!
//! Drives one request through parse, then retrieval and symbolic analysis
//! concurrently, then inference, then merging. Every stage is bounded by
//! the earlier of its own budget and the request deadline, and every
//! suspension point also watches the request's cancellation token.
//!
//! Ordering guarantees:
//!
//! - a stage's audit record is appended before any of its issues stream
//! - the terminal `run_finished` record is appended before the completion
//!   event, and nothing is recorded for the request after it
//! - a failed append stops the run; the client gets a `failed` event

use std::sync::Arc;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sentinel_audit::{AuditError, AuditResult};

use super::merge::IssueMerger;
use super::state::{millis, Interrupt, Phase, PipelineRun};
use crate::audit::AuditTrail;
use crate::capability::{Capabilities, CapabilityError, InferenceInput, Language, SyntaxTree};
use crate::config::StageBudgets;
use crate::context::{ContextChunk, ContextScope, Retrieval};
use crate::domain::{
    AnalysisRequest, AnalysisSummary, ExecutionTarget, Issue, RouteDecision, Stage, StageReport,
    StageStatus,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::{classify, Policy};
use crate::stream::StreamEmitter;

/// Inputs of one run, fixed at classification time.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub request: AnalysisRequest,
    pub decision: RouteDecision,
    /// Snapshot taken when the request was classified.
    pub policy: Arc<Policy>,
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

/// Result of one concurrent gathering branch.
struct BranchOutcome<T> {
    report: StageReport,
    value: T,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    caps: Capabilities,
    audit: AuditTrail,
    budgets: StageBudgets,
    top_k: usize,
}

fn ms_since(start: Instant) -> u64 {
    millis(start.elapsed())
}

fn stage_report(
    stage: Stage,
    status: StageStatus,
    target: Option<ExecutionTarget>,
    started: Instant,
    detail: Option<String>,
) -> StageReport {
    StageReport {
        stage,
        status,
        target,
        elapsed_ms: ms_since(started),
        detail,
    }
}

fn transition(run: &mut PipelineRun, next: Phase) {
    if let Err(e) = run.advance(next) {
        warn!(request_id = %run.request_id(), error = %e, "pipeline transition rejected");
    }
}

impl Coordinator {
    pub fn new(caps: Capabilities, audit: AuditTrail, budgets: StageBudgets, top_k: usize) -> Self {
        Self {
            caps,
            audit,
            budgets,
            top_k,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Classify `request` under `policy`, record the decision, and run it.
    pub async fn execute(
        &self,
        request: AnalysisRequest,
        policy: Arc<Policy>,
        emitter: StreamEmitter,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Option<AnalysisSummary> {
        if self.audit.is_halted() {
            emitter.fail("engine halted after an audit durability failure");
            return None;
        }
        let decision = classify(&request, &policy);
        obs::emit_route_decided(&decision);
        if let Err(e) = self.audit.route_decided(&decision).await {
            emitter.fail(durability_message(&e));
            return None;
        }
        let ctx = RunContext {
            request,
            decision,
            policy,
            cancel,
            deadline,
        };
        self.run(ctx, emitter).await
    }

    /// Run an already classified request to a terminal event.
    ///
    /// Returns the summary that was streamed, or `None` when the run stopped
    /// on a durability failure.
    pub async fn run(&self, ctx: RunContext, mut emitter: StreamEmitter) -> Option<AnalysisSummary> {
        let mut run = PipelineRun::new(ctx.request.id.clone(), ctx.deadline);
        let mut merger = IssueMerger::new();

        if let Err(e) = self.drive(&ctx, &mut run, &mut merger, &mut emitter).await {
            emitter.fail(durability_message(&e));
            return None;
        }
        self.finish(&ctx, run, merger, emitter).await
    }

    /// `false` when the run must stop before the next stage.
    fn may_continue(&self, ctx: &RunContext, run: &mut PipelineRun) -> bool {
        if ctx.cancel.is_cancelled() {
            run.interrupt(Interrupt::Cancelled);
            return false;
        }
        if run.deadline_passed() {
            run.interrupt(Interrupt::DeadlineExpired);
            return false;
        }
        true
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        merger: &mut IssueMerger,
        emitter: &mut StreamEmitter,
    ) -> AuditResult<()> {
        if !self.may_continue(ctx, run) {
            return Ok(());
        }
        transition(run, Phase::Parsing);
        let Some(tree) = self.parse(ctx, run, merger, emitter).await? else {
            return Ok(());
        };

        if !self.may_continue(ctx, run) {
            return Ok(());
        }
        transition(
            run,
            Phase::Gathering {
                retrieval_pending: true,
                symbolic_pending: true,
            },
        );
        let Some((context, annotations)) =
            self.gather(ctx, run, merger, emitter, Arc::clone(&tree)).await?
        else {
            return Ok(());
        };

        if !self.may_continue(ctx, run) {
            return Ok(());
        }
        transition(run, Phase::Inferring);
        self.infer(ctx, run, merger, emitter, tree, context, annotations)
            .await
    }

    /// Append the stage record, then stream the stage's issues.
    #[allow(clippy::too_many_arguments)]
    async fn record_stage(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        merger: &mut IssueMerger,
        emitter: &mut StreamEmitter,
        report: StageReport,
        attempted: &[ExecutionTarget],
        issues: Vec<Issue>,
    ) -> AuditResult<()> {
        let id = &ctx.request.id;
        obs::emit_stage_finished(id.as_str(), &report, issues.len());
        self.audit.stage(id, &report, attempted, issues.len()).await?;
        let stage = report.stage;
        run.record(report);

        for mut issue in issues {
            issue.stage = stage;
            ctx.policy.classify_issue(&mut issue);
            if let Some(issue) = merger.offer(issue) {
                emitter.emit_issue(issue);
            }
        }
        Ok(())
    }

    /// A local-only stage whose route does not permit local execution.
    fn blocked(stage: Stage, started: Instant) -> StageReport {
        stage_report(
            stage,
            StageStatus::Blocked,
            None,
            started,
            Some("route permits no target for this stage".to_string()),
        )
    }

    async fn parse(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        merger: &mut IssueMerger,
        emitter: &mut StreamEmitter,
    ) -> AuditResult<Option<Arc<SyntaxTree>>> {
        let started = Instant::now();
        let local = ExecutionTarget::Local;

        let (report, tree) = if !ctx.decision.permits(Stage::Parse, local) {
            (Self::blocked(Stage::Parse, started), None)
        } else {
            let language = Language::detect(ctx.request.language.as_deref(), ctx.request.path());
            // Parsing is synchronous and local; its budget is checked after
            // the call returns.
            match self.caps.parser.parse(&ctx.request.snapshot, language) {
                Ok(_) if started.elapsed() > self.budgets.parse() => (
                    stage_report(
                        Stage::Parse,
                        StageStatus::TimedOut,
                        Some(local),
                        started,
                        Some("parse exceeded its budget".to_string()),
                    ),
                    None,
                ),
                Ok(tree) => (
                    stage_report(Stage::Parse, StageStatus::Completed, Some(local), started, None),
                    Some(Arc::new(tree)),
                ),
                Err(e) => (
                    stage_report(
                        Stage::Parse,
                        StageStatus::Failed,
                        Some(local),
                        started,
                        Some(e.to_string()),
                    ),
                    None,
                ),
            }
        };

        let attempted = if report.target.is_some() { vec![local] } else { Vec::new() };
        self.record_stage(ctx, run, merger, emitter, report, &attempted, Vec::new())
            .await?;

        if tree.is_none() {
            if run.deadline_passed() {
                run.interrupt(Interrupt::DeadlineExpired);
                return Ok(None);
            }
            for stage in [Stage::ContextRetrieval, Stage::Symbolic, Stage::Inference] {
                let skipped = stage_report(
                    stage,
                    StageStatus::Skipped,
                    None,
                    Instant::now(),
                    Some("parse did not produce a syntax tree".to_string()),
                );
                self.record_stage(ctx, run, merger, emitter, skipped, &[], Vec::new())
                    .await?;
            }
        }
        Ok(tree)
    }

    async fn retrieval_branch(&self, ctx: &RunContext, until: Instant) -> BranchOutcome<Vec<ContextChunk>> {
        let started = Instant::now();
        if !ctx.decision.permits(Stage::ContextRetrieval, ExecutionTarget::Local) {
            return BranchOutcome {
                report: Self::blocked(Stage::ContextRetrieval, started),
                value: Vec::new(),
            };
        }
        let budget = until.saturating_duration_since(started);
        // Retrieved text feeds the inference prompt, so a run that may reach
        // the cloud only sees content never classified sensitive.
        let scope = if ctx.decision.cloud_permitted() {
            ContextScope::Shareable
        } else {
            ContextScope::All
        };
        let retrieval = self
            .caps
            .context
            .retrieve(
                &ctx.request.snapshot,
                ctx.decision.is_sensitive(),
                scope,
                self.top_k,
                budget,
            )
            .await;
        let (status, detail) = match &retrieval {
            Retrieval::Hits(chunks) => (StageStatus::Completed, Some(format!("{} chunks", chunks.len()))),
            Retrieval::TimedOut => (
                StageStatus::TimedOut,
                Some("context sub-deadline exceeded; continuing without context".to_string()),
            ),
            Retrieval::Failed(e) => (StageStatus::Failed, Some(e.clone())),
        };
        BranchOutcome {
            report: stage_report(
                Stage::ContextRetrieval,
                status,
                Some(ExecutionTarget::Local),
                started,
                detail,
            ),
            value: retrieval.into_chunks(),
        }
    }

    async fn symbolic_branch(
        &self,
        ctx: &RunContext,
        tree: Arc<SyntaxTree>,
        until: Instant,
    ) -> BranchOutcome<Vec<Issue>> {
        let started = Instant::now();
        let local = Some(ExecutionTarget::Local);
        if !ctx.decision.permits(Stage::Symbolic, ExecutionTarget::Local) {
            return BranchOutcome {
                report: Self::blocked(Stage::Symbolic, started),
                value: Vec::new(),
            };
        }
        let (report, value) = match timeout_at(until, self.caps.symbolic.analyze(&tree)).await {
            Ok(Ok(issues)) => (
                stage_report(Stage::Symbolic, StageStatus::Completed, local, started, None),
                issues,
            ),
            Ok(Err(e)) => (
                stage_report(Stage::Symbolic, StageStatus::Failed, local, started, Some(e.to_string())),
                Vec::new(),
            ),
            Err(_) => (
                stage_report(
                    Stage::Symbolic,
                    StageStatus::TimedOut,
                    local,
                    started,
                    Some("symbolic analysis exceeded its budget".to_string()),
                ),
                Vec::new(),
            ),
        };
        BranchOutcome { report, value }
    }

    /// Run retrieval and symbolic analysis concurrently. Symbolic issues
    /// stream as soon as that branch reports, even if retrieval is still
    /// running. Returns `None` when the run stopped.
    async fn gather(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        merger: &mut IssueMerger,
        emitter: &mut StreamEmitter,
        tree: Arc<SyntaxTree>,
    ) -> AuditResult<Option<(Vec<ContextChunk>, Vec<Issue>)>> {
        let retrieval = self.retrieval_branch(ctx, run.stage_deadline(self.budgets.context()));
        let symbolic = self.symbolic_branch(ctx, tree, run.stage_deadline(self.budgets.symbolic()));
        tokio::pin!(retrieval, symbolic);

        let mut context: Option<Vec<ContextChunk>> = None;
        let mut annotations: Option<Vec<Issue>> = None;

        while context.is_none() || annotations.is_none() {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    run.interrupt(Interrupt::Cancelled);
                    return Ok(None);
                }
                outcome = &mut retrieval, if context.is_none() => {
                    run.gathered(Stage::ContextRetrieval);
                    self.record_stage(ctx, run, merger, emitter, outcome.report, &[ExecutionTarget::Local], Vec::new())
                        .await?;
                    context = Some(outcome.value);
                }
                outcome = &mut symbolic, if annotations.is_none() => {
                    run.gathered(Stage::Symbolic);
                    let issues = outcome.value;
                    self.record_stage(ctx, run, merger, emitter, outcome.report, &[ExecutionTarget::Local], issues.clone())
                        .await?;
                    annotations = Some(issues);
                }
            }
        }

        if run.deadline_passed() {
            run.interrupt(Interrupt::DeadlineExpired);
            return Ok(None);
        }
        Ok(context.zip(annotations))
    }

    #[allow(clippy::too_many_arguments)]
    async fn infer(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        merger: &mut IssueMerger,
        emitter: &mut StreamEmitter,
        tree: Arc<SyntaxTree>,
        context: Vec<ContextChunk>,
        annotations: Vec<Issue>,
    ) -> AuditResult<()> {
        let started = Instant::now();
        let until = run.stage_deadline(self.budgets.inference());
        let sensitive = ctx.decision.is_sensitive();
        let input = InferenceInput {
            request_id: ctx.request.id.clone(),
            tree,
            context,
            annotations,
            sensitive,
        };

        let mut attempted: Vec<ExecutionTarget> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut status = StageStatus::Skipped;

        for &target in ctx.decision.targets(Stage::Inference) {
            if target == ExecutionTarget::Cloud && sensitive {
                self.violation(ctx, run, target, started, "route permits cloud for a sensitive request")
                    .await?;
                return Ok(());
            }
            let Some(backend) = self.caps.inference.get(target) else {
                failures.push(format!("{target}: no backend configured"));
                continue;
            };

            let available = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    run.interrupt(Interrupt::Cancelled);
                    return Ok(());
                }
                probe = timeout_at(until, backend.is_available()) => probe,
            };
            match available {
                Ok(true) => {}
                Ok(false) => {
                    failures.push(format!("{target}: backend unavailable"));
                    continue;
                }
                Err(_) => {
                    status = StageStatus::TimedOut;
                    failures.push(format!("{target}: availability probe timed out"));
                    break;
                }
            }

            attempted.push(target);
            if target == ExecutionTarget::Cloud {
                METRICS.inc_cloud_inferences();
            }
            debug!(request_id = %ctx.request.id, %target, backend = backend.name(), "inference call");
            let result = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    run.interrupt(Interrupt::Cancelled);
                    return Ok(());
                }
                result = timeout_at(until, backend.infer(&input)) => result,
            };
            match result {
                Ok(Ok(issues)) => {
                    let report = stage_report(
                        Stage::Inference,
                        StageStatus::Completed,
                        Some(target),
                        started,
                        (!failures.is_empty()).then(|| format!("fell back: {}", failures.join("; "))),
                    );
                    return self
                        .record_stage(ctx, run, merger, emitter, report, &attempted, issues)
                        .await;
                }
                Ok(Err(CapabilityError::SensitiveRefused)) => {
                    self.violation(ctx, run, target, started, "backend refused sensitive input")
                        .await?;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    status = StageStatus::Failed;
                    failures.push(format!("{target}: {e}"));
                }
                Err(_) => {
                    status = StageStatus::TimedOut;
                    failures.push(format!("{target}: timed out"));
                    break;
                }
            }
        }

        let detail = if failures.is_empty() {
            "no inference target permitted".to_string()
        } else {
            failures.join("; ")
        };
        let report = stage_report(Stage::Inference, status, None, started, Some(detail));
        self.record_stage(ctx, run, merger, emitter, report, &attempted, Vec::new())
            .await?;
        if status == StageStatus::TimedOut && run.deadline_passed() {
            run.interrupt(Interrupt::DeadlineExpired);
        }
        Ok(())
    }

    async fn violation(
        &self,
        ctx: &RunContext,
        run: &mut PipelineRun,
        target: ExecutionTarget,
        started: Instant,
        reason: &str,
    ) -> AuditResult<()> {
        let id = &ctx.request.id;
        obs::emit_routing_violation(id.as_str(), Stage::Inference, target, reason);
        self.audit
            .routing_violation(id, Stage::Inference, target, reason)
            .await?;
        run.record(stage_report(
            Stage::Inference,
            StageStatus::Blocked,
            None,
            started,
            Some(reason.to_string()),
        ));
        run.interrupt(Interrupt::PolicyViolation);
        Ok(())
    }

    async fn finish(
        &self,
        ctx: &RunContext,
        mut run: PipelineRun,
        merger: IssueMerger,
        emitter: StreamEmitter,
    ) -> Option<AnalysisSummary> {
        transition(&mut run, Phase::Merging);
        let id = &ctx.request.id;
        let issues = merger.finalize();
        let disposition = run.disposition();
        let duration_ms = run.elapsed_ms();
        let degraded: Vec<Stage> = run
            .reports()
            .iter()
            .filter(|r| r.status.is_degraded())
            .map(|r| r.stage)
            .collect();
        let unattempted = run.unattempted();

        if let Err(e) = self
            .audit
            .run_finished(id, disposition, issues.len(), duration_ms, &degraded, &unattempted)
            .await
        {
            emitter.fail(durability_message(&e));
            return None;
        }
        transition(&mut run, Phase::Done);

        obs::emit_run_finished(id.as_str(), disposition, issues.len(), duration_ms);
        METRICS.record_disposition(disposition);

        let summary = AnalysisSummary {
            request_id: id.clone(),
            disposition,
            issues,
            stages: run.reports().to_vec(),
            duration_ms,
        };
        emitter.complete(summary.clone());
        Some(summary)
    }
}

fn durability_message(e: &AuditError) -> String {
    format!("audit durability failure: {e}")
}
