//! Parse and validate stages.
//!
//! Both stages are user logic shipped inside the test definition, written in
//! Rhai. The definition author is trusted: scripts run in-process with the
//! engine's default limits and nothing else. The `Transform` and `Judge`
//! traits are the seam; the script-backed implementations are the only ones
//! the runner loads from files.

use crate::error::EvalError;
use crate::params::Binding;
use crate::process::ExecutionResult;
use crate::schema::TestSpec;
use log::debug;
use regex::Regex;
use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, Scope};
use serde_json::{Value, json};
use std::rc::Rc;

/// Turns captured stdout into a structured result.
pub trait Transform {
    fn parse(&self, text: &str, binding: &Binding) -> Result<Value, EvalError>;
}

/// Judges a structured result.
pub trait Judge {
    fn validate(&self, results: &Value, binding: &Binding) -> Result<Verdict, EvalError>;
}

/// Pass/fail plus an optional explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub message: String,
}

/// What gets recorded for one binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: Value,
    pub passed: bool,
    pub message: String,
}

/// Owns the Rhai engine shared by every compiled script of a run.
pub struct ScriptHost {
    engine: Rc<Engine>,
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHost {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.register_fn("parse_json", parse_json);
        engine.register_fn("regex_captures", regex_captures);
        engine.register_fn("regex_find_all", regex_find_all);
        Self {
            engine: Rc::new(engine),
        }
    }

    pub fn compile_transform(&self, source: &str) -> Result<ScriptTransform, EvalError> {
        Script::compile(&self.engine, source, "parse").map(ScriptTransform)
    }

    pub fn compile_judge(&self, source: &str) -> Result<ScriptJudge, EvalError> {
        Script::compile(&self.engine, source, "validate").map(ScriptJudge)
    }
}

struct Script {
    engine: Rc<Engine>,
    ast: AST,
    entry: &'static str,
}

impl Script {
    fn compile(engine: &Rc<Engine>, source: &str, entry: &'static str) -> Result<Self, EvalError> {
        let ast = engine.compile(source).map_err(|e| EvalError::Compile {
            stage: entry,
            message: e.to_string(),
        })?;

        let defined = ast
            .iter_functions()
            .any(|f| f.name == entry && f.params.len() == 2);
        if !defined {
            return Err(EvalError::MissingFunction { stage: entry });
        }

        Ok(Self {
            engine: Rc::clone(engine),
            ast,
            entry,
        })
    }

    fn call(&self, first: Dynamic, binding: &Binding) -> Result<Dynamic, EvalError> {
        let params = rhai::serde::to_dynamic(binding.to_sorted_map())
            .map_err(|e| EvalError::Runtime(e.to_string()))?;
        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, self.entry, (first, params))
            .map_err(|e| EvalError::Runtime(e.to_string()))
    }
}

/// `fn parse(text, params)` compiled from a definition.
pub struct ScriptTransform(Script);

impl Transform for ScriptTransform {
    fn parse(&self, text: &str, binding: &Binding) -> Result<Value, EvalError> {
        let out = self.0.call(Dynamic::from(text.to_string()), binding)?;
        Ok(to_result_value(out))
    }
}

/// `fn validate(results, params)` compiled from a definition.
pub struct ScriptJudge(Script);

impl Judge for ScriptJudge {
    fn validate(&self, results: &Value, binding: &Binding) -> Result<Verdict, EvalError> {
        let results =
            rhai::serde::to_dynamic(results).map_err(|e| EvalError::Runtime(e.to_string()))?;
        let out = self.0.call(results, binding)?;
        verdict(out)
    }
}

/// Convert a script value to JSON, or wrap its text form when it has no JSON
/// equivalent.
pub fn to_result_value(value: Dynamic) -> Value {
    match rhai::serde::from_dynamic::<Value>(&value) {
        Ok(v) => v,
        Err(_) => json!({ "_repr": value.to_string() }),
    }
}

/// Accepts `bool`, `[bool]`, `[bool, message]`, or any other truthy value.
fn verdict(value: Dynamic) -> Result<Verdict, EvalError> {
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|t| EvalError::BadReturn(t.to_string()))?;
        let Some(first) = items.first() else {
            return Err(EvalError::BadReturn("empty array".to_string()));
        };
        return Ok(Verdict {
            passed: truthy(first)?,
            message: items.get(1).map(|m| m.to_string()).unwrap_or_default(),
        });
    }

    Ok(Verdict {
        passed: truthy(&value)?,
        message: String::new(),
    })
}

fn truthy(value: &Dynamic) -> Result<bool, EvalError> {
    if value.is_unit() {
        return Ok(false);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(b);
    }
    if let Ok(n) = value.as_int() {
        return Ok(n != 0);
    }
    if let Ok(f) = value.as_float() {
        return Ok(f != 0.0);
    }
    if value.is_string() {
        return Ok(!value.to_string().is_empty());
    }
    if let Ok(items) = value.clone().into_array() {
        return Ok(!items.is_empty());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        return Ok(!map.is_empty());
    }
    Err(EvalError::BadReturn(value.type_name().to_string()))
}

fn parse_json(text: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    rhai::serde::to_dynamic(value)
}

/// Capture groups of the first match (index 0 is the whole match), or `()`.
fn regex_captures(text: &str, pattern: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    let re = Regex::new(pattern).map_err(|e| e.to_string())?;
    let Some(caps) = re.captures(text) else {
        return Ok(Dynamic::UNIT);
    };
    let groups: Array = caps
        .iter()
        .map(|m| match m {
            Some(m) => Dynamic::from(m.as_str().to_string()),
            None => Dynamic::UNIT,
        })
        .collect();
    Ok(Dynamic::from_array(groups))
}

/// Every match; the first capture group when the pattern has one.
fn regex_find_all(text: &str, pattern: &str) -> Result<Array, Box<EvalAltResult>> {
    let re = Regex::new(pattern).map_err(|e| e.to_string())?;
    Ok(re
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| Dynamic::from(m.as_str().to_string()))
        .collect())
}

/// Parse and validate for one test, with the defaults filled in.
#[derive(Default)]
pub struct Evaluator {
    transform: Option<Box<dyn Transform>>,
    judge: Option<Box<dyn Judge>>,
}

impl Evaluator {
    pub fn new(transform: Option<Box<dyn Transform>>, judge: Option<Box<dyn Judge>>) -> Self {
        Self { transform, judge }
    }

    /// Compile the test's scripts up front so a missing function surfaces
    /// before any binding runs.
    pub fn compile(spec: &TestSpec, host: &ScriptHost) -> Result<Self, EvalError> {
        let transform = match &spec.parse_code {
            Some(source) => Some(Box::new(host.compile_transform(source)?) as Box<dyn Transform>),
            None => None,
        };
        let judge = match &spec.validate_code {
            Some(source) => Some(Box::new(host.compile_judge(source)?) as Box<dyn Judge>),
            None => None,
        };
        debug!(
            "compiled {}: parse={} validate={}",
            spec.name,
            transform.is_some(),
            judge.is_some()
        );
        Ok(Self::new(transform, judge))
    }

    /// Run the parse stage. Without a parse script the result is `{"stdout": text}`.
    pub fn parse(&self, text: &str, binding: &Binding) -> Result<Value, EvalError> {
        match &self.transform {
            Some(t) => t.parse(text, binding),
            None => Ok(json!({ "stdout": text })),
        }
    }

    /// Run the validate stage. Without a validate script a zero exit code passes.
    /// Errors become a failing verdict.
    pub fn validate(&self, results: &Value, exit_code: i32, binding: &Binding) -> Verdict {
        let Some(judge) = &self.judge else {
            return Verdict {
                passed: exit_code == 0,
                message: String::new(),
            };
        };
        match judge.validate(results, binding) {
            Ok(v) => v,
            Err(e) => Verdict {
                passed: false,
                message: format!("validate error: {e}"),
            },
        }
    }

    /// Parse then validate. A parse failure skips validation.
    pub fn evaluate(&self, exec: &ExecutionResult, binding: &Binding) -> Outcome {
        let result = match self.parse(&exec.stdout, binding) {
            Ok(result) => result,
            Err(e) => {
                return Outcome {
                    result: json!({ "rc": exec.exit_code }),
                    passed: false,
                    message: format!("parse error: {e}"),
                };
            }
        };

        let verdict = self.validate(&result, exec.exit_code, binding);
        Outcome {
            result,
            passed: verdict.passed,
            message: verdict.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(code: i32, stdout: &str) -> ExecutionResult {
        ExecutionResult {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: 0.01,
        }
    }

    fn binding(pairs: &[(&str, Value)]) -> Binding {
        Binding::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn spec(parse: Option<&str>, validate: Option<&str>) -> TestSpec {
        TestSpec {
            name: "t".to_string(),
            job: vec!["true".to_string()],
            parse_code: parse.map(String::from),
            validate_code: validate.map(String::from),
            ..TestSpec::default()
        }
    }

    fn evaluator(parse: Option<&str>, validate: Option<&str>) -> Evaluator {
        Evaluator::compile(&spec(parse, validate), &ScriptHost::new()).unwrap()
    }

    #[test]
    fn defaults_follow_exit_code() {
        let ev = Evaluator::default();
        let ok = ev.evaluate(&exec(0, "1\n"), &Binding::default());
        assert_eq!(ok.result, json!({"stdout": "1\n"}));
        assert!(ok.passed);
        assert_eq!(ok.message, "");

        let bad = ev.evaluate(&exec(2, ""), &Binding::default());
        assert!(!bad.passed);
    }

    #[test]
    fn parse_script_builds_result() {
        let ev = evaluator(
            Some(
                r#"
fn parse(text, params) {
    let caps = regex_captures(text, "bw=([0-9.]+)");
    #{ bw: parse_float(caps[1]), size: params.size }
}
"#,
            ),
            None,
        );
        let out = ev.evaluate(&exec(0, "size 4096 bw=12.5 GB/s\n"), &binding(&[("size", json!(4096))]));
        assert_eq!(out.result, json!({"bw": 12.5, "size": 4096}));
        assert!(out.passed);
    }

    #[test]
    fn validate_script_bool_and_pair() {
        let ev = evaluator(None, Some("fn validate(results, params) { results.stdout == \"ok\\n\" }"));
        assert!(ev.evaluate(&exec(1, "ok\n"), &Binding::default()).passed);
        assert!(!ev.evaluate(&exec(0, "no\n"), &Binding::default()).passed);

        let ev = evaluator(
            None,
            Some("fn validate(results, params) { [params.n > 2, `n is ${params.n}`] }"),
        );
        let out = ev.evaluate(&exec(0, ""), &binding(&[("n", json!(1))]));
        assert!(!out.passed);
        assert_eq!(out.message, "n is 1");

        let out = ev.evaluate(&exec(0, ""), &binding(&[("n", json!(3))]));
        assert!(out.passed);
        assert_eq!(out.message, "n is 3");
    }

    #[test]
    fn single_element_array_has_empty_message() {
        let ev = evaluator(None, Some("fn validate(results, params) { [true] }"));
        let out = ev.evaluate(&exec(0, ""), &Binding::default());
        assert!(out.passed);
        assert_eq!(out.message, "");
    }

    #[test]
    fn truthy_scalars() {
        let ev = evaluator(None, Some("fn validate(results, params) { 0 }"));
        assert!(!ev.evaluate(&exec(0, ""), &Binding::default()).passed);
        let ev = evaluator(None, Some("fn validate(results, params) { \"yes\" }"));
        assert!(ev.evaluate(&exec(0, ""), &Binding::default()).passed);
        let ev = evaluator(None, Some("fn validate(results, params) { () }"));
        assert!(!ev.evaluate(&exec(0, ""), &Binding::default()).passed);
    }

    #[test]
    fn parse_failure_is_contained() {
        let ev = evaluator(Some("fn parse(text, params) { throw \"no bandwidth line\"; }"), None);
        let out = ev.evaluate(&exec(0, "garbage"), &Binding::default());
        assert!(!out.passed);
        assert!(out.message.starts_with("parse error:"), "{}", out.message);
        assert!(out.message.contains("no bandwidth line"));
        assert_eq!(out.result, json!({"rc": 0}));
    }

    #[test]
    fn validate_failure_is_contained() {
        let ev = evaluator(
            Some("fn parse(text, params) { #{ n: 1 } }"),
            Some("fn validate(results, params) { results.missing.deeper > 1 }"),
        );
        let out = ev.evaluate(&exec(0, ""), &Binding::default());
        assert!(!out.passed);
        assert!(out.message.starts_with("validate error:"), "{}", out.message);
        assert_eq!(out.result, json!({"n": 1}));
    }

    #[test]
    fn empty_array_verdict_is_an_error() {
        let ev = evaluator(None, Some("fn validate(results, params) { [] }"));
        let out = ev.evaluate(&exec(0, ""), &Binding::default());
        assert!(!out.passed);
        assert!(out.message.starts_with("validate error:"));
    }

    #[test]
    fn missing_function_fails_compile() {
        let host = ScriptHost::new();
        assert!(matches!(
            host.compile_transform("fn other(a, b) { 1 }"),
            Err(EvalError::MissingFunction { stage: "parse" })
        ));
        assert!(matches!(
            host.compile_judge("fn validate(a) { true }"),
            Err(EvalError::MissingFunction { stage: "validate" })
        ));
    }

    #[test]
    fn syntax_error_fails_compile() {
        let host = ScriptHost::new();
        assert!(matches!(
            host.compile_transform("fn parse(text, params) {"),
            Err(EvalError::Compile { stage: "parse", .. })
        ));
    }

    #[test]
    fn parse_json_helper() {
        let ev = evaluator(Some("fn parse(text, params) { parse_json(text) }"), None);
        let out = ev.evaluate(&exec(0, r#"{"a": [1, 2], "b": null}"#), &Binding::default());
        assert_eq!(out.result, json!({"a": [1, 2], "b": null}));

        let out = ev.evaluate(&exec(0, "not json"), &Binding::default());
        assert!(out.message.starts_with("parse error:"));
    }

    #[test]
    fn regex_find_all_helper() {
        let ev = evaluator(
            Some("fn parse(text, params) { regex_find_all(text, \"t=(\\\\d+)\") }"),
            None,
        );
        let out = ev.evaluate(&exec(0, "t=1 t=22 x t=3"), &Binding::default());
        assert_eq!(out.result, json!(["1", "22", "3"]));
    }

    #[test]
    fn non_json_result_is_wrapped() {
        let ev = evaluator(Some("fn parse(text, params) { Fn(\"parse\") }"), None);
        let out = ev.evaluate(&exec(0, ""), &Binding::default());
        assert!(out.result.get("_repr").is_some(), "{}", out.result);
    }

    struct CountLines;

    impl Transform for CountLines {
        fn parse(&self, text: &str, _binding: &Binding) -> Result<Value, EvalError> {
            Ok(json!({ "lines": text.lines().count() }))
        }
    }

    struct AtLeast(u64);

    impl Judge for AtLeast {
        fn validate(&self, results: &Value, _binding: &Binding) -> Result<Verdict, EvalError> {
            let lines = results["lines"].as_u64().unwrap_or_default();
            Ok(Verdict {
                passed: lines >= self.0,
                message: format!("{lines} lines"),
            })
        }
    }

    #[test]
    fn native_stages_plug_in() {
        let ev = Evaluator::new(Some(Box::new(CountLines)), Some(Box::new(AtLeast(2))));
        let out = ev.evaluate(&exec(0, "a\nb\nc\n"), &Binding::default());
        assert_eq!(out.result, json!({"lines": 3}));
        assert!(out.passed);
        assert_eq!(out.message, "3 lines");
    }
}
