//! Core execution substrate for Ordinaut: the trigger engine, the typed
//! value/template/path-query language, and the deterministic pipeline
//! executor. Nothing here depends on a database — persistence lives in
//! `ordinaut-store`, daemon orchestration in `ordinaut-runtime`.

pub mod error;
pub mod invoker;
pub mod path;
pub mod pipeline;
pub mod template;
pub mod trigger;
pub mod value;

pub use error::{ConditionEvalError, ErrorClass, InvocationError, PipelineError, TemplateRenderError, TriggerError};
pub use invoker::{Invoker, SimulatingInvoker};
pub use pipeline::{Pipeline, PipelineResult, Step};
pub use trigger::{ScheduleKind, ValidationReport};
pub use value::Value;
