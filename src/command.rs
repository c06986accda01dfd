//! Turning a job template into an argument vector.

use crate::error::SpecError;
use crate::schema::TestSpec;
use crate::template::{self, RenderContext, Token};

/// Build the argv for one binding.
///
/// A `{{ snippet.NAME }}` entry contributes exactly one argument holding the
/// rendered snippet, newlines and all. Every other entry is rendered and then
/// split with shell quoting rules.
pub fn build_argv(spec: &TestSpec, ctx: &RenderContext) -> Result<Vec<String>, SpecError> {
    if spec.job.is_empty() {
        return Err(SpecError::EmptyJob);
    }

    let mut argv = Vec::with_capacity(spec.job.len());
    for item in &spec.job {
        let raw = item.trim();
        match template::classify_token(raw) {
            Token::Snippet(name) => {
                let body = spec
                    .snippet(name)
                    .ok_or_else(|| SpecError::UnknownSnippet(name.to_string()))?;
                argv.push(template::render(body, ctx));
            }
            Token::Literal => {
                let rendered = template::render(raw, ctx);
                let words = shlex::split(&rendered).ok_or(SpecError::Tokenize(rendered))?;
                argv.extend(words);
            }
        }
    }

    Ok(argv)
}

/// Shell-quoted rendering of an argv, for dry-run output.
pub fn display_argv(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str))
        .unwrap_or_else(|_| format!("{argv:?}"))
}
