//! The pluggable tool invocation boundary (spec §6.6). The core ships a
//! `SimulatingInvoker` so it is runnable and testable standalone; a real
//! deployment registers a production invoker (HTTP call, local function
//! dispatch, MCP bridge, ...) implementing the same trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::InvocationError;
use crate::value::Value;

#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, address: &str, args: Value, timeout: Duration) -> Result<Value, InvocationError>;
}

/// Default invoker used when no real one is registered. Returns
/// `{ok: true, tool: address, input: args, simulated: true}` after a small
/// delay, making the executor exercisable without any external systems.
pub struct SimulatingInvoker {
    delay: Duration,
}

impl Default for SimulatingInvoker {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10),
        }
    }
}

impl SimulatingInvoker {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Invoker for SimulatingInvoker {
    async fn invoke(&self, address: &str, args: Value, timeout: Duration) -> Result<Value, InvocationError> {
        if timeout.is_zero() {
            return Err(InvocationError::Timeout(timeout));
        }
        tokio::time::sleep(self.delay.min(timeout)).await;

        let mut result = Value::object();
        result.insert("ok", Value::Bool(true));
        result.insert("tool", Value::Str(address.to_string()));
        result.insert("input", args);
        result.insert("simulated", Value::Bool(true));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulating_invoker_echoes_input() {
        let invoker = SimulatingInvoker::default();
        let result = invoker
            .invoke("demo.echo", Value::from("hello"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.get("tool"), Some(&Value::Str("demo.echo".into())));
        assert_eq!(result.get("simulated"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn zero_timeout_fails_immediately() {
        let invoker = SimulatingInvoker::default();
        let result = invoker
            .invoke("demo.echo", Value::Null, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(InvocationError::Timeout(_))));
    }
}
