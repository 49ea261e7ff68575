//! Structural pattern extraction from minified player scripts
//!
//! The three primitive grammars, the driver-function grammar and the
//! throttling-token idiom are process-wide constants. They recognize just
//! enough structure to pull the descrambling algorithm out of an opaque
//! script; nothing here is a general parser.

use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::error::SigdecError;
use crate::scanner;

const JSVAR: &str = r"[a-zA-Z_\$][a-zA-Z_0-9]*";

// Object-literal entry grammars. Each tolerates the minor syntax variants
// seen across script versions (explicit `return`, explicit `%a.length`).
const REVERSE_EXPR: &str = r":function\(a\)\{(?:return )?a\.reverse\(\)\}";
const SPLICE_EXPR: &str = r":function\(a,b\)\{a\.splice\(0,b\)\}";
const SWAP_EXPR: &str =
    r":function\(a,b\)\{var c=a\[0\];a\[0\]=a\[b(?:%a\.length)?\];a\[b(?:%a\.length)?\]=c(?:;return a)?\}";

// Idiom naming the throttling-token function. Captures a primary
// index-accessed identifier and an alternative after `||`; the numeric
// index disambiguates. Coupled to one minification idiom, expected to
// need adjustment as the remote format evolves.
const THROTTLE_NAME_EXPR: &str =
    r#"\.get\("n"\)\)&&\(b=([a-zA-Z0-9$]{0,3})\[(\d+)\](.+)\|\|([a-zA-Z0-9]{0,3})"#;

/// A syntactically complete function literal pulled out of the script.
#[derive(Debug, Clone)]
pub struct ExtractedFunction {
    pub name: String,
    pub source: String,
}

/// Result of matching the actions object and the driver function.
#[derive(Debug, Clone)]
pub struct LocatedOperations {
    pub reverse_key: Option<String>,
    pub splice_key: Option<String>,
    pub swap_key: Option<String>,
    /// Ordered driver calls as (object key, numeric argument).
    pub calls: Vec<(String, Option<i64>)>,
}

/// Match the actions object literal and the driver function, returning the
/// per-operation keys and the ordered call list.
///
/// Fails with `AlgorithmNotFound` when either grammar stops matching; that
/// signals the remote script format changed and must never be swallowed.
pub fn locate_operations(config: &str) -> Result<LocatedOperations, SigdecError> {
    let actions_obj = Regex::new(&format!(
        r"var ({j})=\{{((?:(?:{j}{swap}|{j}{splice}|{j}{reverse}),?\n?)+)\}};",
        j = JSVAR,
        swap = SWAP_EXPR,
        splice = SPLICE_EXPR,
        reverse = REVERSE_EXPR,
    ))?;
    let actions_func = Regex::new(&format!(
        r#"function(?: {j})?\(a\)\{{a=a\.split\(""\);\s*((?:(?:a=)?{j}\.{j}\(a(?:,\d+)?\);)+)return a\.join\(""\)\}}"#,
        j = JSVAR,
    ))?;

    let obj_caps =
        actions_obj
            .captures(config)
            .ok_or_else(|| SigdecError::AlgorithmNotFound {
                stage: "actions object",
                wanted: "reverse/splice/swap object literal".to_string(),
            })?;
    let func_caps =
        actions_func
            .captures(config)
            .ok_or_else(|| SigdecError::AlgorithmNotFound {
                stage: "driver function",
                wanted: "split/join driver function".to_string(),
            })?;

    let obj_name = obj_caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let obj_body = obj_caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let func_body = func_caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    let reverse_key = key_for_grammar(obj_body, REVERSE_EXPR)?;
    let splice_key = key_for_grammar(obj_body, SPLICE_EXPR)?;
    let swap_key = key_for_grammar(obj_body, SWAP_EXPR)?;

    debug!(
        "Matched actions object '{}' (reverse={}, splice={}, swap={})",
        obj_name,
        reverse_key.as_deref().unwrap_or("-"),
        splice_key.as_deref().unwrap_or("-"),
        swap_key.as_deref().unwrap_or("-"),
    );

    // Keys declared on the object; driver calls referencing anything else
    // (helpers on other objects and the like) are skipped, never reordered.
    let declared: HashSet<String> = Regex::new(&format!(r"(?m)(?:^|,)\s*({j}):function", j = JSVAR))?
        .captures_iter(obj_body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    let call_re = Regex::new(&format!(
        r"(?:a=)?{obj}\.({j})\(a(?:,(\d+))?\)",
        obj = regex::escape(obj_name),
        j = JSVAR,
    ))?;

    let mut calls = Vec::new();
    for caps in call_re.captures_iter(func_body) {
        let key = match caps.get(1) {
            Some(m) => m.as_str().to_string(),
            None => continue,
        };
        if !declared.contains(&key) {
            debug!("Skipping call to undeclared key: {}", key);
            continue;
        }
        let arg = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
        calls.push((key, arg));
    }

    debug!("Matched {} driver call steps", calls.len());

    Ok(LocatedOperations {
        reverse_key,
        splice_key,
        swap_key,
        calls,
    })
}

/// Find the object key bound to one primitive grammar. A key whose grammar
/// does not appear stays unresolved; that is only fatal once the driver
/// actually references it.
fn key_for_grammar(obj_body: &str, grammar: &str) -> Result<Option<String>, SigdecError> {
    let re = Regex::new(&format!(r"(?m)(?:^|,)({j}){g}", j = JSVAR, g = grammar))?;
    Ok(re
        .captures(obj_body)
        .and_then(|c| c.get(1).map(|m| m.as_str().to_string())))
}

/// Resolve the name of the throttling-token transform function.
///
/// A zero index selects the alternative identifier (the array alias points
/// straight at it), a nonzero index the primary one.
pub fn locate_throttle_name(config: &str) -> Result<String, SigdecError> {
    let re = Regex::new(THROTTLE_NAME_EXPR)?;
    let caps = re
        .captures(config)
        .ok_or_else(|| SigdecError::AlgorithmNotFound {
            stage: "throttle function name",
            wanted: "get(\"n\") dispatch idiom".to_string(),
        })?;

    let idx: u64 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let name = if idx == 0 {
        caps.get(4).map(|m| m.as_str()).unwrap_or_default()
    } else {
        caps.get(1).map(|m| m.as_str()).unwrap_or_default()
    };

    if name.is_empty() {
        return Err(SigdecError::AlgorithmNotFound {
            stage: "throttle function name",
            wanted: "non-empty function identifier".to_string(),
        });
    }

    debug!("Resolved throttle function name '{}' (index {})", name, idx);
    Ok(name.to_string())
}

/// Extract the complete `function(...){...}` literal bound to `name`.
pub fn extract_function(config: &str, name: &str) -> Result<ExtractedFunction, SigdecError> {
    let def = format!("{}=function(", name);
    let start = config
        .find(&def)
        .ok_or_else(|| SigdecError::AlgorithmNotFound {
            stage: "function extraction",
            wanted: name.to_string(),
        })?;

    // Skip the `name=` binding so the span is a bare function literal.
    let source = scanner::locate(config, start + name.len() + 1, name)?;

    Ok(ExtractedFunction {
        name: name.to_string(),
        source: source.to_string(),
    })
}

/// Locate and extract the throttling-token function in one step.
pub fn extract_throttle_function(config: &str) -> Result<ExtractedFunction, SigdecError> {
    let name = locate_throttle_name(config)?;
    extract_function(config, &name)
}
