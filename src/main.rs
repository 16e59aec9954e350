mod compare;
mod error;
mod executor;
mod loader;
mod model;
mod report;
mod runner;
mod schema;
mod score;

use clap::{Parser, Subcommand, ValueEnum};
use error::{FATAL_EXIT_CODE, HarnessError};
use model::{Suite, Verbosity};
use report::{Document, HumanReporter, Reporter, StructuredReporter};
use std::path::PathBuf;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output, verbosity-gated
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "fixture-runner")]
#[command(about = "A configuration-driven test harness for command-line programs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Configuration file (default: testconfig.{json,yaml,yml,toml} in . or tests/)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Verbosity tier: 0 silent, 1 normal, 2 verbose, 3 debug (overrides the config)
    #[arg(short, long, global = true, value_parser = clap::value_parser!(u8).range(0..=3))]
    verbose: Option<u8>,
    /// Output format
    #[arg(short, long, global = true, default_value = "human")]
    output: OutputFormat,
    /// Stop after the first failed test (overrides the config)
    #[arg(short = 'x', long, global = true)]
    first_failure_exit: bool,
}

#[derive(Clone, Copy, Subcommand)]
enum Command {
    /// Build and run the test suite (default)
    Run,
    /// Load and validate the configuration without running anything
    Validate,
    /// Output the configuration file's JSON Schema
    Schema,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose == Some(3) { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let code = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli),
        Command::Validate => validate(&cli),
        Command::Schema => print_schema(),
    };
    std::process::exit(code);
}

/// Load the suite from the current directory and apply command-line overrides.
fn load(cli: &Cli) -> Result<(PathBuf, Suite), HarnessError> {
    let working_dir = std::env::current_dir().map_err(|source| error::ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let (path, mut suite) = loader::load_suite(cli.config.as_deref(), &working_dir)?;

    if let Some(level) = cli.verbose.and_then(Verbosity::from_level) {
        suite.verbosity = level;
    }
    if cli.first_failure_exit {
        suite.policy.first_failure_exit = true;
    }
    Ok((path, suite))
}

fn cli_verbosity(cli: &Cli) -> Verbosity {
    cli.verbose
        .and_then(Verbosity::from_level)
        .unwrap_or_default()
}

fn run(cli: &Cli) -> i32 {
    let (path, suite) = match load(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            report::report_fatal(&e, cli_verbosity(cli));
            return FATAL_EXIT_CODE;
        }
    };

    let mut reporter: Box<dyn Reporter> = match cli.output {
        OutputFormat::Human => Box::new(HumanReporter::stdout(suite.verbosity)),
        OutputFormat::Json => Box::new(StructuredReporter::new(std::io::stdout(), Document::Json)),
        OutputFormat::Junit => {
            Box::new(StructuredReporter::new(std::io::stdout(), Document::Junit))
        }
    };

    reporter.message(Verbosity::Normal, "Checking configuration file...");
    reporter.message(Verbosity::Verbose, &format!("Using {}", path.display()));
    reporter.message(Verbosity::Normal, "All good.");

    match runner::run_suite(&suite, reporter.as_mut()) {
        Ok(outcome) => {
            tracing::debug!(
                attempted = outcome.results.len(),
                aborted = outcome.aborted,
                "run finished"
            );
            outcome.score.exit_code(&suite.policy)
        }
        Err(e) => {
            report::report_fatal(&e, suite.verbosity);
            FATAL_EXIT_CODE
        }
    }
}

fn validate(cli: &Cli) -> i32 {
    match load(cli) {
        Ok((path, suite)) => {
            println!("✓ {} ({} tests)", path.display(), suite.cases.len());
            0
        }
        Err(e) => {
            eprintln!("✗ {e}");
            FATAL_EXIT_CODE
        }
    }
}

fn print_schema() -> i32 {
    let schema = schema::generate_schema();
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("Failed to serialize schema: {e}");
            FATAL_EXIT_CODE
        }
    }
}
