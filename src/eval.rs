//! Sandboxed execution of extracted script functions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use deno_core::{FastString, JsRuntime, RuntimeOptions};
use tracing::debug;

use crate::error::SigdecError;

/// Fixed internal name the extracted function is bound under.
const BIND_NAME: &str = "__sigdecFn";

/// Minimal capability interface for running one extracted function against
/// one string argument. Keeping the rest of the crate behind this trait
/// means any compliant sandboxed engine can be substituted.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, source: &str, arg: &str, deadline: Duration)
        -> Result<String, SigdecError>;
}

/// `deno_core`-backed evaluator.
///
/// Every call builds a fresh `JsRuntime` with no extensions registered, so
/// the script sees pure computation only: no host I/O, no filesystem, no
/// network, and no state carried over from previous invocations. A
/// watchdog thread terminates the isolate when the deadline expires.
#[derive(Debug, Default)]
pub struct DenoEvaluator;

impl DenoEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn run(runtime: &mut JsRuntime, source: &str, arg: &str) -> Result<String, SigdecError> {
        let bind = format!("var {}=({});", BIND_NAME, source);
        runtime
            .execute_script("<sigdec-bind>", FastString::from(bind))
            .map_err(|e| SigdecError::ScriptExecution {
                stage: "bind",
                cause: e.to_string(),
            })?;

        // The argument travels as a JSON string literal, so arbitrary
        // input cannot break out of the call expression.
        let arg_literal = serde_json::to_string(arg)?;
        let call = format!("String({}({}))", BIND_NAME, arg_literal);
        let value = runtime
            .execute_script("<sigdec-call>", FastString::from(call))
            .map_err(|e| SigdecError::ScriptExecution {
                stage: "call",
                cause: e.to_string(),
            })?;

        let scope = &mut runtime.handle_scope();
        let local = deno_core::v8::Local::new(scope, value);
        if !local.is_string() {
            return Err(SigdecError::ScriptExecution {
                stage: "call",
                cause: "result did not coerce to a string".to_string(),
            });
        }
        Ok(local.to_rust_string_lossy(scope))
    }
}

impl ScriptEvaluator for DenoEvaluator {
    fn evaluate(
        &self,
        source: &str,
        arg: &str,
        deadline: Duration,
    ) -> Result<String, SigdecError> {
        debug!(
            "Evaluating extracted function ({} chars, deadline {:?})",
            source.len(),
            deadline
        );

        let mut runtime = JsRuntime::new(RuntimeOptions::default());

        let isolate_handle = runtime.v8_isolate().thread_safe_handle();
        let expired = Arc::new(AtomicBool::new(false));
        let expired_flag = Arc::clone(&expired);
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let watchdog = thread::spawn(move || {
            if cancel_rx.recv_timeout(deadline).is_err() {
                expired_flag.store(true, Ordering::SeqCst);
                isolate_handle.terminate_execution();
            }
        });

        let result = Self::run(&mut runtime, source, arg);

        let _ = cancel_tx.send(());
        let _ = watchdog.join();

        if expired.load(Ordering::SeqCst) {
            return Err(SigdecError::Timeout(deadline));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[test]
    fn test_evaluate_reverse_function() {
        let eval = DenoEvaluator::new();
        let source = r#"function(a){return a.split("").reverse().join("")}"#;
        assert_eq!(eval.evaluate(source, "abc", DEADLINE).unwrap(), "cba");
    }

    #[test]
    fn test_evaluate_numeric_obfuscation_idioms() {
        // Date arithmetic used purely as a number source, like real
        // throttling transforms do.
        let eval = DenoEvaluator::new();
        let source =
            r#"function(a){var n=new Date("1970-01-01T00:00:02.000Z")/1E3;return a+n}"#;
        assert_eq!(eval.evaluate(source, "x", DEADLINE).unwrap(), "x2");
    }

    #[test]
    fn test_evaluate_argument_with_quotes_is_safe() {
        let eval = DenoEvaluator::new();
        let source = r#"function(a){return a}"#;
        let tricky = r#"ab");//'`\"#;
        assert_eq!(eval.evaluate(source, tricky, DEADLINE).unwrap(), tricky);
    }

    #[test]
    fn test_evaluate_invalid_source_fails() {
        let eval = DenoEvaluator::new();
        let err = eval
            .evaluate("function(a){return", "abc", DEADLINE)
            .unwrap_err();
        match err {
            SigdecError::ScriptExecution { stage, .. } => assert_eq!(stage, "bind"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_thrown_error_fails() {
        let eval = DenoEvaluator::new();
        let err = eval
            .evaluate(r#"function(a){throw new Error("boom")}"#, "abc", DEADLINE)
            .unwrap_err();
        match err {
            SigdecError::ScriptExecution { stage, cause } => {
                assert_eq!(stage, "call");
                assert!(cause.contains("boom"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_deadline_aborts_runaway_script() {
        let eval = DenoEvaluator::new();
        let err = eval
            .evaluate(
                "function(a){while(true){}}",
                "abc",
                Duration::from_millis(200),
            )
            .unwrap_err();
        assert!(matches!(err, SigdecError::Timeout(_)));
    }

    #[test]
    fn test_evaluate_no_state_leaks_between_calls() {
        let eval = DenoEvaluator::new();
        let plant = r#"function(a){globalThis.leak="x";return a}"#;
        let probe = r#"function(a){return typeof globalThis.leak}"#;
        eval.evaluate(plant, "v", DEADLINE).unwrap();
        assert_eq!(eval.evaluate(probe, "v", DEADLINE).unwrap(), "undefined");
    }
}
