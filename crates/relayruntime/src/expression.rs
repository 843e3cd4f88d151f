//! `{{ }}` expression resolution over node parameter trees.
//!
//! Each resolution gets a fresh boa context with the scope injected as
//! frozen globals. Runaway scripts are stopped by the interpreter's loop and
//! recursion limits; the wall-clock budget is enforced per expression and
//! again around the whole blocking evaluation.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction, Source};
use chrono::{Days, NaiveTime, SecondsFormat, Utc};
use rand::Rng;
use relaycore::{ExecutionMode, NodeError};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Expression '{expression}' failed: {message}")]
    Evaluation { expression: String, message: String },

    #[error("Expression '{expression}' exceeded {ms}ms")]
    Timeout { expression: String, ms: u64 },

    #[error("Expression scope setup failed: {0}")]
    Scope(String),

    #[error("Expression evaluation aborted: {0}")]
    Aborted(String),
}

impl From<ExpressionError> for NodeError {
    fn from(err: ExpressionError) -> Self {
        NodeError::Parameter(err.to_string())
    }
}

/// Hard bounds applied to every evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionLimits {
    pub timeout: Duration,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for ExpressionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            loop_iteration_limit: 100_000,
            recursion_limit: 256,
        }
    }
}

/// Read-only bindings visible to expressions
#[derive(Debug, Clone, Default)]
pub struct ExpressionScope {
    /// First input item's fields
    pub json: Value,
    /// `$node` entries keyed by node label
    pub node: Map<String, Value>,
    pub execution_id: String,
    pub mode: ExecutionMode,
    /// Current element and its position, only inside a loop lane
    pub item: Option<Value>,
    pub index: Option<usize>,
}

impl ExpressionScope {
    pub fn new(execution_id: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            json: Value::Object(Map::new()),
            execution_id: execution_id.into(),
            mode,
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = json;
        self
    }

    pub fn with_nodes(mut self, node: Map<String, Value>) -> Self {
        self.node = node;
        self
    }

    pub fn with_loop_lane(mut self, item: Value, index: usize) -> Self {
        self.item = Some(item);
        self.index = Some(index);
        self
    }
}

/// Number of `{{ }}` tokens anywhere in the tree
pub fn count_expressions(value: &Value) -> usize {
    match value {
        Value::String(s) => split_template(s).iter().filter(|p| matches!(p, Part::Expr(_))).count(),
        Value::Array(items) => items.iter().map(count_expressions).sum(),
        Value::Object(map) => map.values().map(count_expressions).sum(),
        _ => 0,
    }
}

/// Resolve every expression in `params` on a blocking thread.
///
/// The whole evaluation is bounded by the per-expression budget times the
/// number of expressions, plus one budget for context setup.
pub async fn resolve_parameters_async(
    params: Value,
    scope: ExpressionScope,
    limits: ExpressionLimits,
) -> Result<Value, ExpressionError> {
    let count = count_expressions(&params);
    if count == 0 {
        return Ok(params);
    }

    let budget = limits.timeout * (count as u32 + 1);
    let handle = tokio::task::spawn_blocking(move || resolve_parameters(&params, &scope, &limits));

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ExpressionError::Aborted(join_err.to_string())),
        Err(_) => Err(ExpressionError::Timeout {
            expression: "<parameters>".to_string(),
            ms: budget.as_millis() as u64,
        }),
    }
}

/// Resolve every expression in `params` synchronously
pub fn resolve_parameters(
    params: &Value,
    scope: &ExpressionScope,
    limits: &ExpressionLimits,
) -> Result<Value, ExpressionError> {
    if count_expressions(params) == 0 {
        return Ok(params.clone());
    }
    let mut evaluator = Evaluator::new(scope, limits)?;
    evaluator.resolve_value(params)
}

#[derive(Debug, PartialEq)]
enum Part<'a> {
    Text(&'a str),
    Expr(&'a str),
}

/// Split on the first `}}` after each `{{`; an unclosed `{{` stays text
fn split_template(template: &str) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        if start > 0 {
            parts.push(Part::Text(&rest[..start]));
        }
        parts.push(Part::Expr(after_open[..end].trim()));
        rest = &after_open[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        parts.push(Part::Text(rest));
    }
    parts
}

struct Evaluator {
    context: Context,
    prelude: String,
    timeout: Duration,
}

impl Evaluator {
    fn new(scope: &ExpressionScope, limits: &ExpressionLimits) -> Result<Self, ExpressionError> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(limits.loop_iteration_limit);
        context
            .runtime_limits_mut()
            .set_recursion_limit(limits.recursion_limit);

        register_helpers(&mut context).map_err(|e| ExpressionError::Scope(e.to_string()))?;

        Ok(Self {
            context,
            prelude: build_prelude(scope)?,
            timeout: limits.timeout,
        })
    }

    fn resolve_value(&mut self, value: &Value) -> Result<Value, ExpressionError> {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, v) in map {
                    resolved.insert(key.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&mut self, template: &str) -> Result<Value, ExpressionError> {
        let parts = split_template(template.trim());

        // A lone token keeps the value's native type
        if let [Part::Expr(expr)] = parts.as_slice() {
            return Ok(self.evaluate(expr)?.unwrap_or(Value::Null));
        }

        let parts = split_template(template);
        if !parts.iter().any(|p| matches!(p, Part::Expr(_))) {
            return Ok(Value::String(template.to_string()));
        }

        let mut out = String::with_capacity(template.len());
        for part in parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => match self.evaluate(expr)? {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(Value::String(out))
    }

    /// Evaluate one expression; `None` means `undefined`
    fn evaluate(&mut self, expr: &str) -> Result<Option<Value>, ExpressionError> {
        let evaluation_error = |message: String| ExpressionError::Evaluation {
            expression: expr.to_string(),
            message,
        };

        if expr.is_empty() {
            return Ok(None);
        }

        // Bindings live in a function scope so each script starts clean
        let script = format!(
            "\"use strict\";\n(function () {{\n{}\
             return JSON.stringify({{ v: ({expr}\n) }});\n}})();",
            self.prelude
        );
        let started = Instant::now();
        let result = self.context.eval(Source::from_bytes(&script));
        let elapsed = started.elapsed();

        if elapsed > self.timeout {
            return Err(ExpressionError::Timeout {
                expression: expr.to_string(),
                ms: self.timeout.as_millis() as u64,
            });
        }

        let result = result.map_err(|e| evaluation_error(e.to_string()))?;
        let text = result
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| evaluation_error("result is not serializable".to_string()))?;

        let wrapper: Value =
            serde_json::from_str(&text).map_err(|e| evaluation_error(e.to_string()))?;
        Ok(wrapper.get("v").cloned())
    }
}

fn build_prelude(scope: &ExpressionScope) -> Result<String, ExpressionError> {
    let to_js = |value: &Value| {
        serde_json::to_string(value).map_err(|e| ExpressionError::Scope(e.to_string()))
    };

    let now = Utc::now();
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let iso = |t: chrono::DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Millis, true);
    let yesterday = midnight.checked_sub_days(Days::new(1)).unwrap_or(midnight);
    let tomorrow = midnight.checked_add_days(Days::new(1)).unwrap_or(midnight);

    let execution = serde_json::json!({
        "id": scope.execution_id,
        "mode": scope.mode.to_string(),
    });

    let mut prelude = String::from(
        r#"
var __deepFreeze = function (value) {
    if (value !== null && typeof value === 'object' && !Object.isFrozen(value)) {
        Object.getOwnPropertyNames(value).forEach(function (key) { __deepFreeze(value[key]); });
        Object.freeze(value);
    }
    return value;
};
"#,
    );

    let mut bind = |name: &str, value: String| {
        prelude.push_str(&format!("const {name} = __deepFreeze({value});\n"));
    };

    bind("$json", to_js(&scope.json)?);
    bind("$node", to_js(&Value::Object(scope.node.clone()))?);
    bind("$execution", to_js(&execution)?);
    bind("$now", to_js(&Value::String(iso(now)))?);
    bind("$today", to_js(&Value::String(iso(midnight)))?);
    bind("$yesterday", to_js(&Value::String(iso(yesterday)))?);
    bind("$tomorrow", to_js(&Value::String(iso(tomorrow)))?);

    if let (Some(item), Some(index)) = (&scope.item, scope.index) {
        bind("$item", to_js(item)?);
        bind("$index", index.to_string());
    }

    Ok(prelude)
}

fn register_helpers(context: &mut Context) -> JsResult<()> {
    let helpers: [(&str, NativeFunction, usize); 3] = [
        ("$randomInt", NativeFunction::from_fn_ptr(random_int), 2),
        ("$base64Encode", NativeFunction::from_fn_ptr(base64_encode), 1),
        ("$base64Decode", NativeFunction::from_fn_ptr(base64_decode), 1),
    ];

    for (name, function, length) in helpers {
        let object = FunctionObjectBuilder::new(context.realm(), function)
            .name(js_string!(name))
            .length(length)
            .constructor(false)
            .build();
        context.register_global_property(js_string!(name), object, Attribute::READONLY)?;
    }
    Ok(())
}

fn random_int(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let min = number_arg(args, 0, context)?.ceil() as i64;
    let max = number_arg(args, 1, context)?.floor() as i64;

    if min > max {
        return Err(JsNativeError::range()
            .with_message("$randomInt: min must be <= max")
            .into());
    }

    let value = rand::thread_rng().gen_range(min..=max);
    Ok(JsValue::from(value as f64))
}

fn base64_encode(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let input = string_arg(args, 0, context)?;
    Ok(JsValue::from(js_string!(BASE64_STANDARD.encode(input.as_bytes()))))
}

fn base64_decode(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let input = string_arg(args, 0, context)?;
    let decoded = BASE64_STANDARD
        .decode(input.as_bytes())
        .map_err(|_| JsNativeError::typ().with_message("$base64Decode: invalid base64 input"))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| JsNativeError::typ().with_message("$base64Decode: invalid UTF-8"))?;
    Ok(JsValue::from(js_string!(text)))
}

fn number_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<f64> {
    let value = args.get(index).cloned().unwrap_or(JsValue::undefined());
    let number = value.to_number(context)?;
    if !number.is_finite() {
        return Err(JsNativeError::typ()
            .with_message(format!("argument {} must be a finite number", index))
            .into());
    }
    Ok(number)
}

fn string_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    match args.get(index) {
        Some(value) if !value.is_undefined() && !value.is_null() => {
            Ok(value.to_string(context)?.to_std_string_escaped())
        }
        _ => Ok(String::new()),
    }
}
