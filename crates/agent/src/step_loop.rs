//! One step at a time: propose, execute, verify.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stepgate_backend::MouseButton;
use stepgate_core_types::{Snapshot, StepId};
use stepgate_runtime::{
    AgentRuntime, RuntimeError, StepEndSummary, UsageRole, VerificationResult,
};
use stepgate_snapshot::{compact_lines, CompactConfig, SnapshotOptions};
use stepgate_verify::{EventuallyConfig, Predicate};

use crate::action::{parse_action, Action};
use crate::errors::AgentError;
use crate::executor::{Executor, ExecutorReply, VisionExecutor};
use crate::prompt::{DefaultPromptBuilder, PromptBuilder, PromptInputs};

/// Knobs for the step loop.
#[derive(Clone, Debug)]
pub struct StepAgentConfig {
    /// Snapshot limit for the step's initial capture.
    pub snapshot_limit_base: u32,
    /// Coordinate-based retries allowed per step when vision is wired.
    pub max_vision_attempts: u32,
    pub compact: CompactConfig,
}

impl Default for StepAgentConfig {
    fn default() -> Self {
        Self {
            snapshot_limit_base: 60,
            max_vision_attempts: 1,
            compact: CompactConfig::default(),
        }
    }
}

/// One verification attached to a step.
pub struct StepVerification {
    pub predicate: Predicate,
    pub label: String,
    pub required: bool,
    /// Retry budget; `None` means a one-shot assert.
    pub eventually: Option<EventuallyConfig>,
}

impl StepVerification {
    pub fn once(predicate: Predicate, label: impl Into<String>, required: bool) -> Self {
        Self {
            predicate,
            label: label.into(),
            required,
            eventually: None,
        }
    }

    pub fn retried(
        predicate: Predicate,
        label: impl Into<String>,
        required: bool,
        config: EventuallyConfig,
    ) -> Self {
        Self {
            predicate,
            label: label.into(),
            required,
            eventually: Some(config),
        }
    }
}

/// Specification of one step.
pub struct StepSpec {
    pub goal: String,
    /// Overrides the agent-wide snapshot limit for this step.
    pub snapshot_limit: Option<u32>,
    pub verifications: Vec<StepVerification>,
}

impl StepSpec {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            snapshot_limit: None,
            verifications: Vec::new(),
        }
    }

    pub fn with_snapshot_limit(mut self, limit: u32) -> Self {
        self.snapshot_limit = Some(limit);
        self
    }

    pub fn verify(mut self, verification: StepVerification) -> Self {
        self.verifications.push(verification);
        self
    }
}

/// Outcome of one step.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub step_id: StepId,
    pub ok: bool,
    pub action: Option<Action>,
    pub error: Option<String>,
    /// Terminal task success (FINISH or a passed assert_done).
    pub finished: bool,
    pub verifications: Vec<VerificationResult>,
}

/// Outcome of a multi-step run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub ok: bool,
    pub finished: bool,
}

/// Drives steps through the verification runtime.
pub struct StepAgent {
    runtime: AgentRuntime,
    executor: Arc<dyn Executor>,
    vision: Option<Arc<dyn VisionExecutor>>,
    prompt_builder: Arc<dyn PromptBuilder>,
    config: StepAgentConfig,
}

impl StepAgent {
    pub fn new(runtime: AgentRuntime, executor: Arc<dyn Executor>) -> Self {
        Self {
            runtime,
            executor,
            vision: None,
            prompt_builder: Arc::new(DefaultPromptBuilder),
            config: StepAgentConfig::default(),
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionExecutor>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn with_config(mut self, config: StepAgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    /// Run one step. Transport and protocol failures fail the step and
    /// come back inside the report; cancellation and policy errors
    /// propagate after the step end is flushed.
    pub async fn step(&self, task_goal: &str, spec: &StepSpec) -> Result<StepReport, AgentError> {
        let step_id = self.runtime.begin_step(&spec.goal, None).await?;
        match self.drive(task_goal, spec).await {
            Ok((action, finished)) => {
                let mut summary = StepEndSummary::default();
                if let Some(action) = &action {
                    summary = summary.with_action(json!({ "canonical": action.to_string() }));
                }
                let step = self.runtime.emit_step_end(summary).await;
                let (ok, verifications) = step
                    .map(|s| (s.is_ok(), s.verifications))
                    .unwrap_or((false, Vec::new()));
                Ok(StepReport {
                    step_id,
                    ok,
                    action,
                    error: None,
                    finished: finished || self.runtime.is_task_done(),
                    verifications,
                })
            }
            Err(err) if err.is_cancelled() || err.is_policy() => {
                self.runtime
                    .emit_error(err.name(), &err.to_string(), Value::Null)
                    .await;
                self.runtime
                    .emit_step_end(StepEndSummary::default().with_error(err.to_string()))
                    .await;
                Err(err)
            }
            Err(err) => {
                warn!(target: "stepgate-agent", %err, "step failed");
                self.runtime
                    .emit_error(err.name(), &err.to_string(), Value::Null)
                    .await;
                let step = self
                    .runtime
                    .emit_step_end(StepEndSummary::default().with_error(err.to_string()))
                    .await;
                Ok(StepReport {
                    step_id,
                    ok: false,
                    action: None,
                    error: Some(err.to_string()),
                    finished: false,
                    verifications: step.map(|s| s.verifications).unwrap_or_default(),
                })
            }
        }
    }

    /// Iterate steps; `stop_on_failure` halts at the first failing step,
    /// terminal success halts always.
    pub async fn run(
        &self,
        task_goal: &str,
        steps: &[StepSpec],
        stop_on_failure: bool,
    ) -> Result<RunReport, AgentError> {
        let mut reports = Vec::new();
        let mut finished = false;
        for spec in steps {
            let report = self.step(task_goal, spec).await?;
            let step_ok = report.ok;
            finished = report.finished;
            reports.push(report);
            if finished {
                break;
            }
            if stop_on_failure && !step_ok {
                info!(target: "stepgate-agent", "halting run on first failing step");
                break;
            }
        }
        let ok = reports.iter().all(|r| r.ok);
        Ok(RunReport {
            steps: reports,
            ok,
            finished,
        })
    }

    async fn drive(
        &self,
        task_goal: &str,
        spec: &StepSpec,
    ) -> Result<(Option<Action>, bool), AgentError> {
        let limit = spec.snapshot_limit.unwrap_or(self.config.snapshot_limit_base);
        let options = SnapshotOptions::default().with_limit(limit);

        let snapshot = self.runtime.snapshot_fresh(&options).await?;
        let lines = compact_lines(&snapshot, &self.config.compact);
        let prompts = self.prompt_builder.build(&PromptInputs {
            task_goal,
            step_goal: &spec.goal,
            snapshot: &snapshot,
            compact_lines: &lines,
            history_summary: None,
        });

        let reply = self.executor.decide(&prompts.system, &prompts.user).await?;
        self.record_usage(UsageRole::Executor, &reply);
        let action = parse_action(&reply.text)?;
        debug!(target: "stepgate-agent", action = %action, "executor proposed action");
        self.runtime
            .emit_action(json!({
                "raw": reply.text.trim(),
                "canonical": action.to_string(),
            }))
            .await;

        let finished = action.is_terminal();
        if !finished {
            self.execute(&action, &snapshot).await?;
            self.runtime.invalidate_snapshot();
            self.runtime.post_action_snapshot(&options).await?;
        }

        let outcomes = self.evaluate(&spec.verifications).await?;
        let failed_required: Vec<usize> = spec
            .verifications
            .iter()
            .enumerate()
            .filter(|(idx, v)| v.required && !outcomes[*idx])
            .map(|(idx, _)| idx)
            .collect();

        if !failed_required.is_empty() && !finished {
            self.try_vision_rescue(spec, &options, &failed_required)
                .await?;
        }

        Ok((Some(action), finished))
    }

    async fn evaluate(
        &self,
        verifications: &[StepVerification],
    ) -> Result<Vec<bool>, AgentError> {
        let mut outcomes = Vec::with_capacity(verifications.len());
        for v in verifications {
            let result = match v.eventually {
                Some(config) => {
                    self.runtime
                        .check(v.predicate.clone(), v.label.clone(), v.required)
                        .eventually(config)
                        .await?
                }
                None => self.runtime.assert(&v.predicate, &v.label, v.required).await?,
            };
            outcomes.push(result.passed);
        }
        Ok(outcomes)
    }

    /// One coordinate-based retry proposed from a screenshot.
    async fn try_vision_rescue(
        &self,
        spec: &StepSpec,
        options: &SnapshotOptions,
        failed_required: &[usize],
    ) -> Result<(), AgentError> {
        let Some(vision) = &self.vision else {
            return Ok(());
        };
        if self.config.max_vision_attempts == 0 {
            return Ok(());
        }

        info!(
            target: "stepgate-agent",
            failed = failed_required.len(),
            "escalating to vision fallback"
        );
        let screenshot = self
            .runtime
            .backend()
            .screenshot_png()
            .await
            .map_err(RuntimeError::from)?;
        let reply = vision.decide(&spec.goal, &screenshot).await?;
        self.record_usage(UsageRole::VisionExecutor, &reply);
        let action = parse_action(&reply.text)?;
        self.runtime
            .emit_action(json!({
                "canonical": action.to_string(),
                "vision": true,
            }))
            .await;

        if !action.is_terminal() {
            let snapshot = self.runtime.snapshot(options).await?;
            self.execute(&action, &snapshot).await?;
            self.runtime.invalidate_snapshot();
            self.runtime.post_action_snapshot(options).await?;
        }

        for idx in failed_required {
            let v = &spec.verifications[*idx];
            match v.eventually {
                Some(config) => {
                    self.runtime
                        .check(v.predicate.clone(), v.label.clone(), v.required)
                        .eventually(config)
                        .await?;
                }
                None => {
                    self.runtime.assert(&v.predicate, &v.label, v.required).await?;
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, action: &Action, snapshot: &Snapshot) -> Result<(), AgentError> {
        let backend = self.runtime.backend();
        match action {
            Action::Click { id } => {
                let element = snapshot
                    .element(*id)
                    .ok_or(AgentError::ElementNotFound { id: *id })?;
                let (x, y) = element.bbox.center();
                backend
                    .mouse_click(x, y, MouseButton::Left, 1)
                    .await
                    .map_err(RuntimeError::from)?;
            }
            Action::Type { id, text } => {
                let element = snapshot
                    .element(*id)
                    .ok_or(AgentError::ElementNotFound { id: *id })?;
                let (x, y) = element.bbox.center();
                backend
                    .mouse_click(x, y, MouseButton::Left, 1)
                    .await
                    .map_err(RuntimeError::from)?;
                backend.type_text(text).await.map_err(RuntimeError::from)?;
            }
            Action::Press { key } => {
                backend.press_key(key).await.map_err(RuntimeError::from)?;
            }
            Action::ClickXy { x, y } => {
                backend
                    .mouse_click(*x, *y, MouseButton::Left, 1)
                    .await
                    .map_err(RuntimeError::from)?;
            }
            Action::ClickRect { x, y, w, h } => {
                backend
                    .mouse_click(x + w / 2.0, y + h / 2.0, MouseButton::Left, 1)
                    .await
                    .map_err(RuntimeError::from)?;
            }
            Action::Finish => {}
        }
        Ok(())
    }

    fn record_usage(&self, role: UsageRole, reply: &ExecutorReply) {
        if let Some(usage) = reply.usage {
            let model = reply.model.as_deref().unwrap_or("unknown");
            self.runtime.usage().record(role, model, usage);
        }
    }
}
