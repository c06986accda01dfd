//! Test execution engine.
//!
//! Runs every selected test once per parameter binding, strictly in order,
//! and records one perflog row per binding.

use crate::command;
use crate::config::RunConfig;
use crate::env;
use crate::error::{ExecError, RecorderError};
use crate::evaluate::{Evaluator, Outcome, ScriptHost};
use crate::params::{self, Binding};
use crate::perflog::{Entry, Recorder};
use crate::process;
use crate::schema::TestSpec;
use crate::template::RenderContext;
use log::{debug, error, info};
use serde_json::json;
use std::ops::AddAssign;

/// Aggregate result of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    fn count(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// Run every test in order.
///
/// Per-binding failures are recorded and counted. Only a perflog write
/// failure aborts the run.
pub fn run_tests(tests: &[TestSpec], config: &RunConfig) -> Result<RunSummary, RecorderError> {
    let host = ScriptHost::new();
    let recorder = Recorder::new(&config.prefix, &config.sysenv);

    let mut summary = RunSummary::default();
    for spec in tests {
        info!("running test \"{}\"", spec.name);
        if let Some(description) = &spec.description {
            debug!("{description}");
        }
        summary += run_test(spec, config, &host, &recorder)?;
    }
    Ok(summary)
}

fn run_test(
    spec: &TestSpec,
    config: &RunConfig,
    host: &ScriptHost,
    recorder: &Recorder,
) -> Result<RunSummary, RecorderError> {
    let bindings = params::expand(&spec.params);
    let mut summary = RunSummary::default();

    let evaluator = match Evaluator::compile(spec, host) {
        Ok(evaluator) => evaluator,
        Err(e) => {
            // Nothing can be judged; every binding fails without running.
            let message = format!("spec error: {e}");
            for binding in &bindings {
                report(binding, false, &message);
                if !config.dry_run {
                    record(recorder, spec, binding, 0.0, false, &message, &json!({}))?;
                }
                summary.count(false);
            }
            return Ok(summary);
        }
    };

    let runner = BindingRunner {
        spec,
        config,
        recorder,
        evaluator: &evaluator,
    };
    for binding in &bindings {
        if let Some(passed) = runner.run(binding)? {
            summary.count(passed);
        }
    }
    Ok(summary)
}

struct BindingRunner<'a> {
    spec: &'a TestSpec,
    config: &'a RunConfig,
    recorder: &'a Recorder,
    evaluator: &'a Evaluator,
}

impl BindingRunner<'_> {
    /// Run one binding. `None` for a dry run that rendered cleanly.
    fn run(&self, binding: &Binding) -> Result<Option<bool>, RecorderError> {
        let ctx = RenderContext::new(&self.config.extra_args, binding);
        let argv = match command::build_argv(self.spec, &ctx) {
            Ok(argv) => argv,
            Err(e) => {
                let message = format!("spec error: {e}");
                report(binding, false, &message);
                if !self.config.dry_run {
                    self.record(binding, 0.0, false, &message, &json!({}))?;
                }
                return Ok(Some(false));
            }
        };

        if self.config.dry_run {
            info!("{}", prefixed(binding, &format!("DRYRUN {}", command::display_argv(&argv))));
            return Ok(None);
        }

        let vars = env::overlay(&self.spec.env, binding);
        let workdir = self.spec.workdir.as_deref();
        let exec = match process::run(&argv, &vars, workdir, self.config.timeout) {
            Ok(exec) => exec,
            Err(ExecError::Timeout(secs)) => {
                report(binding, false, "timeout");
                self.record(binding, secs as f64, false, "timeout", &json!({ "rc": "timeout" }))?;
                return Ok(Some(false));
            }
            Err(e) => {
                let message = format!("exec error: {e}");
                report(binding, false, &message);
                self.record(binding, 0.0, false, &message, &json!({ "error": e.to_string() }))?;
                return Ok(Some(false));
            }
        };

        let Outcome {
            result,
            passed,
            message,
        } = self.evaluator.evaluate(&exec, binding);
        report(binding, passed, &message);
        if !passed && !exec.stderr.is_empty() {
            debug!("stderr:\n{}", exec.stderr.trim_end());
        }
        self.record(binding, exec.duration, passed, &message, &result)?;
        Ok(Some(passed))
    }

    fn record(
        &self,
        binding: &Binding,
        duration: f64,
        passed: bool,
        message: &str,
        result: &serde_json::Value,
    ) -> Result<(), RecorderError> {
        record(
            self.recorder,
            self.spec,
            binding,
            duration,
            passed,
            message,
            result,
        )
    }
}

fn record(
    recorder: &Recorder,
    spec: &TestSpec,
    binding: &Binding,
    duration: f64,
    passed: bool,
    message: &str,
    result: &serde_json::Value,
) -> Result<(), RecorderError> {
    recorder.record(&Entry {
        test_name: &spec.name,
        binding,
        duration,
        passed,
        message,
        result,
    })?;
    Ok(())
}

/// One log line per binding: parameter columns, status, message.
fn report(binding: &Binding, passed: bool, message: &str) {
    let status = if passed { "[PASS]" } else { "[FAIL]" };
    let line = prefixed(binding, &format!("{status} {message}"));
    if passed {
        info!("{}", line.trim_end());
    } else {
        error!("{}", line.trim_end());
    }
}

fn prefixed(binding: &Binding, rest: &str) -> String {
    if binding.is_empty() {
        rest.to_string()
    } else {
        format!("{} {rest}", binding.columns())
    }
}
