mod command;
mod config;
mod env;
mod error;
mod evaluate;
mod loader;
mod params;
mod perflog;
mod process;
mod runner;
mod schema;
mod template;

use clap::{Parser, Subcommand};
use config::RunConfig;
use error::ConfigError;
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "unframe")]
#[command(about = "A declarative, parameterized test runner that records results as perflogs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every test in a directory once per parameter combination
    Run {
        /// Tests directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Extra template arguments as a JSON object, e.g. '{"account":"proj123"}'
        #[arg(short, long, default_value = "{}")]
        extra_args: String,
        /// Seconds each command may run before it is killed
        #[arg(short, long)]
        maxtime: Option<u64>,
        /// Only display the commands that would run
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Output prefix; perflogs go to <OUTPUT>/perflogs/<SYSENV>/
        #[arg(short, long, default_value = config::DEFAULT_PREFIX)]
        output: PathBuf,
        /// Run tests carrying this tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// System/environment label recorded with each result
        #[arg(short, long, default_value = config::DEFAULT_SYSENV)]
        sysenv: String,
        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check test definitions without running them
    Validate {
        /// Tests directory
        dir: PathBuf,
    },
    /// Scaffold a new test definition
    Init {
        /// Output path for the new definition
        #[arg(default_value = "tests/example.yaml")]
        path: PathBuf,
    },
    /// Output the definition schema
    Schema,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            dir,
            extra_args,
            maxtime,
            dry_run,
            output,
            tags,
            sysenv,
            verbose,
        } => {
            init_logging(verbose);

            let extra_args = match config::parse_extra_args(&extra_args) {
                Ok(v) => v,
                Err(e) => return config_error(&e),
            };
            let config = RunConfig {
                tests_dir: dir,
                tags,
                sysenv,
                timeout: maxtime,
                prefix: output,
                dry_run,
                extra_args,
            };
            run(&config)
        }
        Command::Validate { dir } => {
            init_logging(false);
            validate(&dir)
        }
        Command::Init { path } => init(&path),
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn config_error(e: &ConfigError) -> ExitCode {
    error!("{e}");
    ExitCode::from(2)
}

fn run(config: &RunConfig) -> ExitCode {
    let tests = match loader::load_selected(&config.tests_dir, &config.tags) {
        Ok(tests) => tests,
        Err(e) => return config_error(&e),
    };

    let summary = match runner::run_tests(&tests, config) {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if !config.dry_run {
        info!("{} passed, {} failed", summary.passed, summary.failed);
    }
    if summary.any_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn validate(dir: &Path) -> ExitCode {
    let paths = match loader::find_specs(dir) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error finding tests: {e}");
            return ExitCode::from(2);
        }
    };
    if paths.is_empty() {
        eprintln!("No test definitions found at: {}", dir.display());
        return ExitCode::from(2);
    }

    let host = evaluate::ScriptHost::new();
    let mut errors = 0;
    for path in &paths {
        let checked = loader::load_spec(path)
            .map_err(|e| e.to_string())
            .and_then(|spec| {
                spec.check().map_err(|e| e.to_string())?;
                evaluate::Evaluator::compile(&spec, &host).map_err(|e| e.to_string())?;
                Ok(spec)
            });
        match checked {
            Ok(spec) => {
                let combos = params::expand(&spec.params).len();
                println!("✓ {} ({}, {combos} combinations)", path.display(), spec.name);
            }
            Err(e) => {
                eprintln!("✗ {}: {e}", path.display());
                errors += 1;
            }
        }
    }

    if errors > 0 {
        eprintln!("\n{errors} definition(s) failed validation");
        return ExitCode::FAILURE;
    }
    println!("\nAll {} definition(s) valid", paths.len());
    ExitCode::SUCCESS
}

fn init(path: &Path) -> ExitCode {
    if path.exists() {
        eprintln!("Error: file already exists: {}", path.display());
        return ExitCode::FAILURE;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("Error creating directory: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = fs::write(path, schema::INIT_TEMPLATE) {
        eprintln!("Error writing file: {e}");
        return ExitCode::FAILURE;
    }
    println!("Created: {}", path.display());
    ExitCode::SUCCESS
}
