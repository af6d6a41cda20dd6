//! The agent loop: plan, gate, act, observe.
//!
//! One user turn runs at most `max_steps` planning calls. Each decision is
//! either a final answer or an action; actions are checked for repeats,
//! risk-gated, executed through the harness and recorded so the next
//! planning call can see what happened.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_config::AgentConfig;
use stepwise_core::decision::{Action, ActionKind, ArgMap, Decision};
use stepwise_core::error::{CatalogError, ExecError};
use stepwise_core::risk::{RiskLevel, RiskPolicy};
use stepwise_exec::{Harness, Invocation, friendly_error};
use tracing::{debug, info, warn};

use crate::answer_stream::AnswerExtractor;
use crate::author::UnitAuthor;
use crate::catalog_text::{CATALOG_TOKEN_BUDGET, build_unit_catalog};
use crate::confirm::Confirmer;
use crate::context::{DEFAULT_TOKEN_BUDGET, build_planner_prompt, env_context};
use crate::error::AuthorError;
use crate::history::{ActionRecord, HISTORY_MAX_CHARS, SessionHistory, display_args, format_tool_args, signature, summary};
use crate::output::{OutputWriter, StepInfo, StepReport, StepStatus};
use crate::planner::{Decider, DecisionRequest};
use crate::risk::assess_risk;

pub const DEFAULT_MAX_STEPS: usize = 4;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered,
    Canceled,
    LoopDetected,
    MaxStepsReached,
    Failed { message: String, exit_code: i32 },
}

impl TurnOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            _ => 0,
        }
    }

    fn failed(message: impl Into<String>, exit_code: i32) -> Self {
        Self::Failed {
            message: message.into(),
            exit_code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Everything recorded this turn, errors included.
    pub records: Vec<ActionRecord>,
    /// Planning calls made.
    pub steps: usize,
}

enum StepFlow {
    Continue,
    Stop(TurnOutcome),
}

/// Writer, confirmer and history for the step being dispatched.
struct StepContext<'a> {
    step: usize,
    request: &'a str,
    decision: &'a Decision,
    records: &'a mut Vec<ActionRecord>,
    out: &'a mut dyn OutputWriter,
    confirmer: &'a mut dyn Confirmer,
}

pub struct AgentLoop {
    decider: Decider,
    harness: Arc<Harness>,
    base_dir: PathBuf,
    max_steps: usize,
    risk_policy: RiskPolicy,
    confirm_tools: bool,
    json_mode: bool,
    token_budget: usize,
    history_max_chars: usize,
    catalog_budget: usize,
    scope: Option<String>,
    env_context: String,
    author: Option<Arc<dyn UnitAuthor>>,
    unit_catalog: Option<String>,
    tool_catalog: String,
}

impl AgentLoop {
    pub fn new(decider: Decider, harness: Arc<Harness>, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let tool_catalog = harness.tools().catalog();
        Self {
            decider,
            harness,
            env_context: env_context(&base_dir),
            base_dir,
            max_steps: DEFAULT_MAX_STEPS,
            risk_policy: RiskPolicy::Normal,
            confirm_tools: true,
            json_mode: false,
            token_budget: DEFAULT_TOKEN_BUDGET,
            history_max_chars: HISTORY_MAX_CHARS,
            catalog_budget: CATALOG_TOKEN_BUDGET,
            scope: None,
            author: None,
            unit_catalog: None,
            tool_catalog,
        }
    }

    /// Applies the `[agent]` config section.
    pub fn with_config(self, config: &AgentConfig) -> Self {
        self.with_max_steps(config.max_steps)
            .with_risk_policy(config.policy().unwrap_or_default())
            .with_confirm_tools(config.confirm_tools)
            .with_token_budget(config.token_budget)
            .with_history_max_chars(config.history_max_chars)
            .with_catalog_budget(config.catalog_token_budget)
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.risk_policy = policy;
        self
    }

    pub fn with_confirm_tools(mut self, confirm: bool) -> Self {
        self.confirm_tools = confirm;
        self
    }

    /// Machine-readable mode: execution errors end the turn, no paging prompts.
    pub fn with_json_mode(mut self, json: bool) -> Self {
        self.json_mode = json;
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_history_max_chars(mut self, max_chars: usize) -> Self {
        self.history_max_chars = max_chars;
        self
    }

    pub fn with_catalog_budget(mut self, budget: usize) -> Self {
        self.catalog_budget = budget;
        self
    }

    /// Limits the unit catalog to groups or units matching `scope`.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope.filter(|s| !s.trim().is_empty());
        self.unit_catalog = None;
        self
    }

    pub fn with_env_context(mut self, context: impl Into<String>) -> Self {
        self.env_context = context.into();
        self
    }

    pub fn with_author(mut self, author: Arc<dyn UnitAuthor>) -> Self {
        self.author = Some(author);
        self
    }

    pub fn decider(&self) -> &Decider {
        &self.decider
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// The unit catalog text, built on first use.
    pub fn unit_catalog(&mut self) -> &str {
        if self.unit_catalog.is_none() {
            self.refresh_catalog();
        }
        self.unit_catalog.as_deref().unwrap_or("(none)")
    }

    /// Rebuilds the unit catalog text from the catalog provider.
    pub fn refresh_catalog(&mut self) {
        let text = build_unit_catalog(
            self.harness.catalog().as_ref(),
            &self.base_dir,
            self.scope.as_deref(),
            self.catalog_budget,
        );
        self.unit_catalog = Some(text);
    }

    /// Runs one user turn and folds it into `session`.
    pub async fn run_turn(
        &mut self,
        request: &str,
        session: &mut SessionHistory,
        out: &mut dyn OutputWriter,
        confirmer: &mut dyn Confirmer,
    ) -> TurnReport {
        let previous_prompts = session.previous_prompts();
        let carried = session.records();
        let mut records: Vec<ActionRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_answer = String::new();
        let mut steps = 0;

        debug!(
            max_steps = self.max_steps,
            json = self.json_mode,
            policy = %self.risk_policy,
            "Starting turn"
        );

        let outcome = 'turn: {
            for step in 1..=self.max_steps {
                steps = step;
                let prompt = build_planner_prompt(
                    request,
                    &records,
                    &previous_prompts,
                    &carried,
                    self.token_budget,
                );
                let unit_catalog = self.unit_catalog().to_string();
                debug!(step, prompt_len = prompt.len(), "Agent step");

                out.begin_thinking();
                let decided = {
                    let mut extractor = AnswerExtractor::new();
                    let writer = &mut *out;
                    let mut on_token = |token: &str| {
                        let text = extractor.feed(token);
                        if !text.is_empty() {
                            writer.answer_delta(&text);
                        }
                    };
                    let decision_request = DecisionRequest {
                        prompt: &prompt,
                        unit_catalog: &unit_catalog,
                        tool_catalog: &self.tool_catalog,
                        env_context: &self.env_context,
                    };
                    self.decider.decide(&decision_request, &mut on_token).await
                };
                out.end_thinking();

                let decision = match decided {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!(step, error = %e, "Planning call failed");
                        out.error(&e.to_string(), "");
                        break 'turn TurnOutcome::failed(e.to_string(), 1);
                    }
                };
                out.provider_info(&decision.provider, &decision.model);
                debug!(step, action = %decision.kind(), target = decision.action.target(), "Decision received");

                if decision.action == Action::Answer {
                    out.answer(&decision.answer);
                    break 'turn TurnOutcome::Answered;
                }

                if let Some(sig) = signature(&decision.action)
                    && !seen.insert(sig)
                {
                    info!(step, action = %decision.kind(), "Repeated action, stopping");
                    out.loop_detected(&decision.answer);
                    break 'turn TurnOutcome::LoopDetected;
                }

                let ctx = StepContext {
                    step,
                    request,
                    decision: &decision,
                    records: &mut records,
                    out: &mut *out,
                    confirmer: &mut *confirmer,
                };
                match self.dispatch(ctx).await {
                    StepFlow::Continue => {
                        if !decision.answer.trim().is_empty() {
                            last_answer = decision.answer.clone();
                        }
                    }
                    StepFlow::Stop(outcome) => break 'turn outcome,
                }
            }
            info!(steps, "Max steps reached");
            out.max_steps_reached(&last_answer);
            TurnOutcome::MaxStepsReached
        };

        session.record_turn(request, &records);
        out.finalize();
        TurnReport {
            outcome,
            records,
            steps,
        }
    }

    async fn dispatch(&mut self, ctx: StepContext<'_>) -> StepFlow {
        let decision = ctx.decision;
        match &decision.action {
            Action::RunUnit { name, params, args } => self.run_unit_step(ctx, name.trim(), params, args).await,
            Action::RunTool { name, args } => self.run_tool_step(ctx, name.trim(), args).await,
            Action::ProposeUnit { description } => self.propose_step(ctx, description.trim()).await,
            Action::Answer => {
                ctx.out.answer(&decision.answer);
                StepFlow::Stop(TurnOutcome::Answered)
            }
        }
    }

    async fn run_unit_step(
        &mut self,
        ctx: StepContext<'_>,
        name: &str,
        params: &ArgMap,
        positional: &[String],
    ) -> StepFlow {
        if name.is_empty() {
            return terminal(ctx, "agent selected run_unit without unit name");
        }
        let args_display = display_args(&ctx.decision.action);
        let record = ActionRecord::new(ctx.step, ActionKind::RunUnit, name, args_display.clone());

        let info = match self.harness.catalog().get_info(&self.base_dir, name) {
            Ok(info) => info,
            Err(CatalogError::NotFound(_)) => {
                return self.reject(ctx, record, &ExecError::UnknownUnit(name.to_string()).to_string());
            }
            Err(e) => return self.reject(ctx, record, &e.to_string()),
        };
        if let Err(e) = Invocation::for_unit(&info, params, positional) {
            return self.reject(ctx, record, &e.to_string());
        }

        let (mut report, ctx) = match self.gate(ctx, name, &args_display, false) {
            Ok(gated) => gated,
            Err(flow) => return flow,
        };

        match self.harness.run_unit(&self.base_dir, name, params, positional).await {
            Ok(output) => {
                report.status = StepStatus::Ok;
                ctx.out.add_step(report);
                ctx.records.push(record.succeeded(&output, self.history_max_chars));
                ctx.out.partial_answer(&ctx.decision.answer);
                StepFlow::Continue
            }
            Err(e) => {
                warn!(unit = name, error = %e, timeout = e.is_timeout(), "Unit run failed");
                report.status = StepStatus::Error;
                ctx.out.add_step(report);
                if self.json_mode {
                    ctx.out.error(&e.to_string(), &ctx.decision.answer);
                    return StepFlow::Stop(TurnOutcome::failed(e.to_string(), 1));
                }
                ctx.out
                    .action_error(&friendly_error(e.output()).unwrap_or_else(|| e.to_string()));
                let mut message = e.to_string();
                if !e.output().trim().is_empty() {
                    message.push('\n');
                    message.push_str(e.output().trim());
                }
                ctx.records.push(record.failed(&message, self.history_max_chars));
                StepFlow::Continue
            }
        }
    }

    async fn run_tool_step(&mut self, ctx: StepContext<'_>, name: &str, args: &ArgMap) -> StepFlow {
        if name.is_empty() {
            return terminal(ctx, "agent selected run_tool without tool name");
        }
        let args_display = format_tool_args(args);
        let record = ActionRecord::new(ctx.step, ActionKind::RunTool, name, args_display.clone());

        if !self.harness.tools().is_known_tool(name) {
            return self.reject(ctx, record, &ExecError::UnknownTool(name.to_string()).to_string());
        }

        let (mut report, ctx) = match self.gate(ctx, name, &args_display, false) {
            Ok(gated) => gated,
            Err(flow) => return flow,
        };

        let mut run = self.harness.run_tool(&self.base_dir, name, args).await;
        if !run.success() {
            warn!(tool = name, exit_code = run.exit_code, "Tool run failed");
            report.status = StepStatus::Error;
            ctx.out.add_step(report);
            if self.json_mode {
                let message = format!("tool execution failed: {name}");
                ctx.out.error(&message, &ctx.decision.answer);
                return StepFlow::Stop(TurnOutcome::failed(message, run.exit_code));
            }
            ctx.out.action_error(run.output.trim());
            let mut message = format!("tool execution failed (exit code {})", run.exit_code);
            if !run.output.trim().is_empty() {
                message.push('\n');
                message.push_str(run.output.trim());
            }
            ctx.records.push(record.failed(&message, self.history_max_chars));
            return StepFlow::Continue;
        }

        ctx.out.action_output(&run.output);
        let mut captured = run.output.trim_end().to_string();

        while run.can_continue && !self.json_mode {
            if !ctx.confirmer.confirm_more(&run.continue_prompt) {
                break;
            }
            let next_args = std::mem::take(&mut run.continue_params);
            run = self.harness.run_tool(&self.base_dir, name, &next_args).await;
            if !run.success() {
                warn!(tool = name, exit_code = run.exit_code, "Tool continuation failed");
                report.status = StepStatus::Error;
                ctx.out.add_step(report);
                ctx.out.action_error(run.output.trim());
                let message = format!("tool continuation failed (exit code {})", run.exit_code);
                ctx.records.push(record.failed(&message, self.history_max_chars));
                return StepFlow::Continue;
            }
            ctx.out.action_output(&run.output);
            captured.push('\n');
            captured.push_str(run.output.trim_end());
        }

        report.status = StepStatus::Ok;
        ctx.out.add_step(report);
        ctx.records.push(record.succeeded(&captured, self.history_max_chars));
        ctx.out.partial_answer(&ctx.decision.answer);
        StepFlow::Continue
    }

    async fn propose_step(&mut self, ctx: StepContext<'_>, description: &str) -> StepFlow {
        if description.is_empty() {
            return terminal(ctx, "agent proposed a new unit without a description");
        }
        let author = match (&self.author, self.json_mode) {
            (Some(author), false) => Arc::clone(author),
            _ => {
                ctx.out.answer(&proposal_text(description, &ctx.decision.answer));
                return StepFlow::Stop(TurnOutcome::Answered);
            }
        };

        let (mut report, ctx) = match self.gate(ctx, description, "", true) {
            Ok(gated) => gated,
            Err(flow) => return flow,
        };

        match author.author(&self.base_dir, ctx.request, description).await {
            Ok(unit) => {
                info!(unit = %unit.name, path = %unit.path.display(), "Unit authored");
                self.harness.catalog().invalidate(&self.base_dir);
                self.refresh_catalog();
                report.status = StepStatus::Ok;
                ctx.out.add_step(report);
                ctx.out
                    .action_output(&format!("Created unit {} in {}", unit.name, unit.path.display()));
                let mut record = ActionRecord::new(ctx.step, ActionKind::ProposeUnit, unit.name.clone(), "");
                record.result = format!("ok; unit {} created", unit.name);
                ctx.records.push(record);
                StepFlow::Continue
            }
            Err(AuthorError::Declined) => {
                report.status = StepStatus::Canceled;
                ctx.out.add_step(report);
                ctx.out.canceled(&ctx.decision.answer);
                StepFlow::Stop(TurnOutcome::Canceled)
            }
            Err(e) => {
                report.status = StepStatus::Error;
                ctx.out.add_step(report);
                ctx.out.error(&e.to_string(), &ctx.decision.answer);
                StepFlow::Stop(TurnOutcome::failed(e.to_string(), 1))
            }
        }
    }

    /// Shows the step, assesses risk and asks for confirmation if needed.
    ///
    /// Returns the pending step report, or the flow to stop with when the
    /// operator declines.
    fn gate<'a>(
        &self,
        ctx: StepContext<'a>,
        target: &str,
        args_display: &str,
        always_confirm: bool,
    ) -> Result<(StepReport, StepContext<'a>), StepFlow> {
        let risk = assess_risk(
            ctx.decision,
            self.harness.catalog().as_ref(),
            self.harness.tools(),
            &self.base_dir,
        );
        let planned = summary(&ctx.decision.action);
        ctx.out.step_info(&StepInfo {
            step: ctx.step,
            max_steps: self.max_steps,
            summary: &planned,
            reason: &ctx.decision.reason,
            risk: &risk,
        });

        let mut report = StepReport {
            step: ctx.step,
            action: ctx.decision.kind(),
            target: target.to_string(),
            args: args_display.to_string(),
            reason: ctx.decision.reason.trim().to_string(),
            risk: risk.level,
            risk_reason: risk.reason.clone(),
            status: StepStatus::Pending,
        };

        let needs_confirmation =
            always_confirm || self.risk_policy.should_confirm(self.confirm_tools, risk.level);
        if needs_confirmation {
            let level = if always_confirm { RiskLevel::High } else { risk.level };
            if !ctx.confirmer.confirm_action(level) {
                info!(step = ctx.step, risk = %risk.level, "Action declined");
                report.status = StepStatus::Canceled;
                ctx.out.add_step(report);
                ctx.out.canceled(&ctx.decision.answer);
                return Err(StepFlow::Stop(TurnOutcome::Canceled));
            }
        }
        Ok((report, ctx))
    }

    /// Records a rejected action. Recoverable unless in JSON mode.
    fn reject(&self, ctx: StepContext<'_>, record: ActionRecord, message: &str) -> StepFlow {
        debug!(step = ctx.step, reason = message, "Action rejected before execution");
        ctx.records.push(record.failed(message, self.history_max_chars));
        if self.json_mode {
            ctx.out.error(message, &ctx.decision.answer);
            return StepFlow::Stop(TurnOutcome::failed(message, 1));
        }
        StepFlow::Continue
    }
}

fn terminal(ctx: StepContext<'_>, message: &str) -> StepFlow {
    ctx.out.error(message, &ctx.decision.answer);
    StepFlow::Stop(TurnOutcome::failed(message, 1))
}

fn proposal_text(description: &str, answer: &str) -> String {
    let proposal = format!("No existing unit covers this. Proposed new unit: {description}");
    match answer.trim() {
        "" => proposal,
        text => format!("{text}\n\n{proposal}"),
    }
}
