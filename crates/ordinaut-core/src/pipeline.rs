//! Deterministic pipeline executor (spec §4.3): runs a task's `pipeline`
//! array in order against a context, invoking tools via an [`Invoker`] and
//! capturing outputs under `ctx.steps`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ErrorClass, PipelineError};
use crate::invoker::Invoker;
use crate::path;
use crate::template;
use crate::value::Value;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const STEP_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub uses: String,
    #[serde(default)]
    pub with: Option<Value>,
    #[serde(default)]
    pub save_as: Option<String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub params: Value,
    pub pipeline: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Ran,
    Skipped,
}

/// Final verdict of a pipeline run: the rendered context plus, on failure,
/// the error and the id of the step it happened at.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub ctx: Value,
    pub success: bool,
    pub error: Option<PipelineError>,
}

/// Validates structural invariants ahead of execution: unique step ids,
/// non-empty `uses` addresses.
pub fn validate(pipeline: &Pipeline) -> Result<(), PipelineError> {
    let mut seen = std::collections::HashSet::new();
    for step in &pipeline.pipeline {
        if !seen.insert(step.id.as_str()) {
            return Err(PipelineError::DuplicateStepId(step.id.clone()));
        }
        if step.uses.trim().is_empty() {
            return Err(PipelineError::EmptyUses(step.id.clone()));
        }
    }
    Ok(())
}

/// Runs `pipeline` against a freshly initialized context (`now`, `params`,
/// empty `steps`), invoking tools through `invoker`. Stops at the first
/// unrecoverable step failure per spec §4.3.
pub async fn run(
    pipeline: &Pipeline,
    invoker: Arc<dyn Invoker>,
    now: DateTime<Utc>,
) -> PipelineResult {
    if let Err(e) = validate(pipeline) {
        return PipelineResult {
            ctx: initial_ctx(pipeline, now),
            success: false,
            error: Some(e),
        };
    }

    let mut ctx = initial_ctx(pipeline, now);

    for step in &pipeline.pipeline {
        match run_step(step, &ctx, invoker.as_ref()).await {
            Ok((StepOutcome::Skipped, _)) => {
                info!(step_id = %step.id, "step skipped by condition");
                continue;
            }
            Ok((StepOutcome::Ran, output)) => {
                if let (Some(save_as), Some(out)) = (&step.save_as, output) {
                    set_step_output(&mut ctx, save_as, out);
                }
            }
            Err(err) => {
                warn!(step_id = %step.id, error = %err, "step failed, aborting pipeline");
                return PipelineResult {
                    ctx,
                    success: false,
                    error: Some(err),
                };
            }
        }
    }

    PipelineResult {
        ctx,
        success: true,
        error: None,
    }
}

fn initial_ctx(pipeline: &Pipeline, now: DateTime<Utc>) -> Value {
    let mut ctx = Value::object();
    ctx.insert("now", Value::Str(now.to_rfc3339()));
    ctx.insert("params", pipeline.params.clone());
    ctx.insert("steps", Value::object());
    ctx
}

fn set_step_output(ctx: &mut Value, save_as: &str, output: Value) {
    if let Value::Object(root) = ctx {
        if let Some(Value::Object(_)) = root.get("steps") {
        } else {
            root.insert("steps".to_string(), Value::object());
        }
        if let Some(Value::Object(steps)) = root.get_mut("steps") {
            steps.insert(save_as.to_string(), output);
        }
    }
}

/// Runs a single step: condition check, template render, invocation with
/// step-level retry, output capture.
async fn run_step(
    step: &Step,
    ctx: &Value,
    invoker: &dyn Invoker,
) -> Result<(StepOutcome, Option<Value>), PipelineError> {
    if let Some(expr) = &step.condition {
        let rendered =
            template::render(&Value::from(expr.as_str()), ctx).map_err(|e| PipelineError::TemplateRender {
                step_id: step.id.clone(),
                source: e,
            })?;
        let expr_str = rendered.as_str().unwrap_or(expr);
        let keep = path::eval_condition(expr_str, ctx).map_err(|e| PipelineError::ConditionEval {
            step_id: step.id.clone(),
            source: e,
        })?;
        if !keep {
            return Ok((StepOutcome::Skipped, None));
        }
    }

    let args = match &step.with {
        Some(w) => template::render(w, ctx).map_err(|e| PipelineError::TemplateRender {
            step_id: step.id.clone(),
            source: e,
        })?,
        None => Value::object(),
    };

    let timeout = step
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STEP_TIMEOUT);
    let max_attempts = step.max_retries.unwrap_or(0) + 1;

    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match invoker.invoke(&step.uses, args.clone(), timeout).await {
            Ok(output) => return Ok((StepOutcome::Ran, Some(output))),
            Err(e) => {
                last_err = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(STEP_RETRY_BACKOFF).await;
                }
            }
        }
    }

    let class = last_err.as_ref().map(|e| e.class()).unwrap_or(ErrorClass::Retryable);
    Err(PipelineError::ToolInvocation {
        step_id: step.id.clone(),
        cause: last_err.map(|e| e.to_string()).unwrap_or_default(),
        class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::SimulatingInvoker;

    fn step(id: &str, with: Option<Value>, condition: Option<&str>, save_as: Option<&str>) -> Step {
        Step {
            id: id.to_string(),
            uses: "demo.echo".to_string(),
            with,
            save_as: save_as.map(str::to_string),
            condition: condition.map(str::to_string),
            timeout_seconds: None,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn pipeline_executes_each_step_in_order_and_captures_output() {
        let pipeline = Pipeline {
            params: Value::object(),
            pipeline: vec![step(
                "a",
                Some(Value::from("hi")),
                None,
                Some("a_result"),
            )],
        };
        let result = run(&pipeline, Arc::new(SimulatingInvoker::default()), Utc::now()).await;
        assert!(result.success);
        assert!(result.ctx.get("steps").unwrap().get("a_result").is_some());
    }

    #[tokio::test]
    async fn skipped_step_does_not_record_output() {
        let pipeline = Pipeline {
            params: Value::object(),
            pipeline: vec![step("a", None, Some("false"), Some("a_result"))],
        };
        let result = run(&pipeline, Arc::new(SimulatingInvoker::default()), Utc::now()).await;
        assert!(result.success);
        assert!(result.ctx.get("steps").unwrap().get("a_result").is_none());
    }

    #[tokio::test]
    async fn duplicate_step_ids_are_rejected() {
        let pipeline = Pipeline {
            params: Value::object(),
            pipeline: vec![step("a", None, None, None), step("a", None, None, None)],
        };
        let result = run(&pipeline, Arc::new(SimulatingInvoker::default()), Utc::now()).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(PipelineError::DuplicateStepId(_))));
    }

    #[tokio::test]
    async fn empty_uses_is_rejected() {
        let pipeline = Pipeline {
            params: Value::object(),
            pipeline: vec![Step {
                id: "a".into(),
                uses: "".into(),
                with: None,
                save_as: None,
                condition: None,
                timeout_seconds: None,
                max_retries: None,
            }],
        };
        let result = run(&pipeline, Arc::new(SimulatingInvoker::default()), Utc::now()).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(PipelineError::EmptyUses(_))));
    }

    #[tokio::test]
    async fn template_resolution_matches_example() {
        let mut steps = BTreeMap::new();
        let mut w = BTreeMap::new();
        w.insert("temp".to_string(), Value::Num(15.0));
        w.insert("summary".to_string(), Value::Str("Sunny".to_string()));
        steps.insert("w".to_string(), Value::Object(w));
        let mut ctx = BTreeMap::new();
        ctx.insert("steps".to_string(), Value::Object(steps));
        let ctx = Value::Object(ctx);

        let mut with = BTreeMap::new();
        with.insert("location".to_string(), Value::from("${params.city}"));
        with.insert(
            "msg".to_string(),
            Value::from("${steps.w.summary} ${steps.w.temp}\u{00B0}C"),
        );
        let rendered = template::render(&Value::Object(with), &ctx).unwrap();
        assert_eq!(
            rendered.get("msg"),
            Some(&Value::Str("Sunny 15\u{00B0}C".to_string()))
        );
    }
}
