//! Error taxonomy shared across trigger evaluation, templating, and the
//! pipeline executor. Mirrors the kinds named in the error handling design:
//! permanent errors carry no retry information, retryable ones do.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriggerError {
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionEvalError {
    #[error("invalid path expression: {0}")]
    InvalidPath(String),
    #[error("invalid literal in condition: {0}")]
    InvalidLiteral(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateRenderError {
    #[error("unterminated template expression in: {0}")]
    Unterminated(String),
    #[error(transparent)]
    Condition(#[from] ConditionEvalError),
}

/// Whether an execution-time error should be retried by the Worker Runtime
/// or is terminal for the current run. See spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("template render failed at step {step_id}: {source}")]
    TemplateRender {
        step_id: String,
        source: TemplateRenderError,
    },
    #[error("condition evaluation failed at step {step_id}: {source}")]
    ConditionEval {
        step_id: String,
        source: ConditionEvalError,
    },
    #[error("tool invocation failed at step {step_id}: {cause}")]
    ToolInvocation {
        step_id: String,
        cause: String,
        class: ErrorClass,
    },
    #[error("pipeline aborted at step {step_id}: {reason}")]
    PipelineAbort { step_id: String, reason: String },
    #[error("duplicate step id in pipeline: {0}")]
    DuplicateStepId(String),
    #[error("step {0} has an empty `uses` address")]
    EmptyUses(String),
}

impl PipelineError {
    pub fn step_id(&self) -> Option<&str> {
        match self {
            PipelineError::TemplateRender { step_id, .. } => Some(step_id),
            PipelineError::ConditionEval { step_id, .. } => Some(step_id),
            PipelineError::ToolInvocation { step_id, .. } => Some(step_id),
            PipelineError::PipelineAbort { step_id, .. } => Some(step_id),
            PipelineError::DuplicateStepId(_) | PipelineError::EmptyUses(_) => None,
        }
    }

    /// Classification per spec §7: template/condition errors and validation
    /// failures are permanent; tool errors depend on what the invoker
    /// reported (see `InvocationError::class`).
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::TemplateRender { .. }
            | PipelineError::ConditionEval { .. }
            | PipelineError::DuplicateStepId(_)
            | PipelineError::EmptyUses(_) => ErrorClass::Permanent,
            PipelineError::PipelineAbort { .. } => ErrorClass::Permanent,
            PipelineError::ToolInvocation { class, .. } => *class,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvocationError {
    #[error("tool timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transient tool error: {0}")]
    Transient(String),
    #[error("permanent tool error: {0}")]
    Permanent(String),
}

impl InvocationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            InvocationError::Timeout(_) | InvocationError::Transient(_) => ErrorClass::Retryable,
            InvocationError::Permanent(_) => ErrorClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_errors_are_permanent() {
        let err = PipelineError::TemplateRender {
            step_id: "a".into(),
            source: TemplateRenderError::Unterminated("${x".into()),
        };
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn tool_invocation_errors_forward_the_invoker_classification() {
        let retryable = PipelineError::ToolInvocation {
            step_id: "a".into(),
            cause: "boom".into(),
            class: ErrorClass::Retryable,
        };
        assert_eq!(retryable.class(), ErrorClass::Retryable);

        let permanent = PipelineError::ToolInvocation {
            step_id: "a".into(),
            cause: "bad auth".into(),
            class: ErrorClass::Permanent,
        };
        assert_eq!(permanent.class(), ErrorClass::Permanent);
    }

    #[test]
    fn invocation_timeout_is_retryable() {
        assert_eq!(
            InvocationError::Timeout(std::time::Duration::from_secs(1)).class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn invocation_permanent_is_permanent() {
        assert_eq!(
            InvocationError::Permanent("bad auth".into()).class(),
            ErrorClass::Permanent
        );
    }
}
