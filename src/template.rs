//! `{{ dotted.path }}` substitution.
//!
//! Lookups never fail: a path that does not resolve renders as the empty
//! string, so optional `extra_args` can simply be left out. Nothing is escaped.

use crate::params::Binding;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
});

static SNIPPET_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{\s*snippet\.([A-Za-z0-9_-]+)\s*\}\}$").expect("snippet pattern is valid")
});

/// How a job entry is turned into arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Exactly `{{ snippet.NAME }}`: the rendered snippet is one argument.
    Snippet(&'a str),
    /// Anything else: render, then shell-split.
    Literal,
}

/// Classify a job entry. Surrounding whitespace is ignored.
pub fn classify_token(raw: &str) -> Token<'_> {
    match SNIPPET_TOKEN.captures(raw.trim()) {
        Some(caps) => match caps.get(1) {
            Some(name) => Token::Snippet(name.as_str()),
            None => Token::Literal,
        },
        None => Token::Literal,
    }
}

/// Layered lookup: `extra_args` underneath the current binding.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    root: Map<String, Value>,
}

impl RenderContext {
    pub fn new(extra_args: &Value, binding: &Binding) -> Self {
        let mut root = Map::new();
        root.insert("extra_args".to_string(), extra_args.clone());
        for (key, value) in binding.iter() {
            root.insert(key.to_string(), value.clone());
        }
        Self { root }
    }

    /// Resolve a dotted path. `None` if any segment is missing or the value
    /// at that point is not a mapping.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Substitute every placeholder in `text`.
pub fn render(text: &str, ctx: &RenderContext) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            ctx.lookup(&caps[1]).map(display_value).unwrap_or_default()
        })
        .into_owned()
}

/// String form used for substitution, environment export and job scalars.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(extra: Value, pairs: &[(&str, Value)]) -> RenderContext {
        let binding = Binding::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        RenderContext::new(&extra, &binding)
    }

    #[test]
    fn renders_binding_values() {
        let c = ctx(json!({}), &[("n", json!(8)), ("mode", json!("fast"))]);
        assert_eq!(render("--rate {{ n }} --{{mode}}", &c), "--rate 8 --fast");
    }

    #[test]
    fn renders_nested_extra_args() {
        let c = ctx(json!({"slurm": {"partition": "dev-g"}}), &[]);
        assert_eq!(
            render("-p {{ extra_args.slurm.partition }}", &c),
            "-p dev-g"
        );
    }

    #[test]
    fn missing_paths_render_blank() {
        let c = ctx(json!({"account": "proj"}), &[("n", json!(1))]);
        assert_eq!(render("[{{ nope }}]", &c), "[]");
        assert_eq!(render("[{{ extra_args.partition }}]", &c), "[]");
        // descending into a scalar
        assert_eq!(render("[{{ n.value }}]", &c), "[]");
        assert_eq!(render("[{{ extra_args.account.x }}]", &c), "[]");
        assert_eq!(render("[{{ a..b }}]", &c), "[]");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let c = ctx(json!({}), &[("n", json!(1))]);
        let text = "echo '$HOME' \"a b\" {not a placeholder} {{ }}\n";
        assert_eq!(render(text, &c), text);
        assert_eq!(render(&render(text, &c), &c), text);
    }

    #[test]
    fn nothing_is_escaped() {
        let c = ctx(json!({}), &[("s", json!("<a & 'b'>"))]);
        assert_eq!(render("{{ s }}", &c), "<a & 'b'>");
    }

    #[test]
    fn binding_shadows_extra_args_key() {
        let c = ctx(json!({"x": 1}), &[("extra_args", json!("mine"))]);
        assert_eq!(render("{{ extra_args }}", &c), "mine");
    }

    #[test]
    fn display_forms() {
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(2.5)), "2.5");
        assert_eq!(display_value(&json!([1, "a"])), r#"[1,"a"]"#);
    }

    #[test]
    fn classifies_snippet_tokens() {
        assert_eq!(classify_token("{{ snippet.script }}"), Token::Snippet("script"));
        assert_eq!(classify_token("  {{snippet.run-me_2}} "), Token::Snippet("run-me_2"));
        assert_eq!(classify_token("x {{ snippet.script }}"), Token::Literal);
        assert_eq!(classify_token("{{ snippet.a.b }}"), Token::Literal);
        assert_eq!(classify_token("{{ n }}"), Token::Literal);
    }
}
