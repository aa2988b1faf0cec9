//! labrun CLI - Run Android device tests on a remote test lab.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use labrun::api::HttpTestLab;
use labrun::config::{self, ApiVersion, Settings, StepConfig};
use labrun::matrix;
use labrun::pipeline::Pipeline;
use labrun::report::{ConsoleReporter, JUnitReporter, MultiReporter};

const DEFAULT_SETTINGS: &str = "labrun.toml";
const LOG_ENV: &str = "LABRUN_LOG";

#[derive(Parser)]
#[command(name = "labrun")]
#[command(about = "Run Android device tests on a remote test lab", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Settings file path [default: labrun.toml]
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload, submit and wait for results (the default)
    Run(RunArgs),

    /// Validate the step inputs and build the test matrix without network access
    Validate {
        /// API revision the server speaks
        #[arg(long, value_enum, env = "api_version")]
        api_version: Option<ApiVersion>,
    },

    /// Print the test matrix that would be submitted
    Matrix,

    /// Write a template settings file
    Init,
}

#[derive(Args)]
struct RunArgs {
    /// JUnit XML output path (enables JUnit output)
    #[arg(long)]
    junit: Option<PathBuf>,

    /// API revision the server speaks
    #[arg(long, value_enum, env = "api_version")]
    api_version: Option<ApiVersion>,

    /// Seconds between status checks
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Fixed ceiling on the total wait, in seconds
    #[arg(long, value_name = "SECS")]
    max_wait: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let settings_path = cli.settings.clone();
    let result = match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(args) => run_tests(settings_path.as_deref(), args).await,
        Commands::Validate { api_version } => validate(settings_path.as_deref(), api_version),
        Commands::Matrix => print_matrix(),
        Commands::Init => init_settings(settings_path.as_deref()),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Loads the settings file; only an explicitly named file must exist.
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Ok(config::load_settings(path, true)?),
        None => Ok(config::load_settings(Path::new(DEFAULT_SETTINGS), false)?),
    }
}

async fn run_tests(settings_path: Option<&Path>, args: RunArgs) -> Result<u8> {
    let mut settings = load_settings(settings_path)?;

    // Apply overrides
    if let Some(version) = args.api_version {
        settings.poll.api_version = version;
    }
    if let Some(interval) = args.poll_interval {
        settings.poll.interval_secs = interval;
    }
    if let Some(max_wait) = args.max_wait {
        settings.poll.max_wait_secs = Some(max_wait);
    }

    let step_config = StepConfig::from_env();
    step_config.log_summary();

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            ctrl_c_token.cancel();
        }
    });

    let lab = HttpTestLab::from_config(&step_config, settings.poll.api_version);
    info!("Using API version: {}", lab.api_version());
    let reporter = create_reporter(&settings, args.junit);
    let pipeline =
        Pipeline::new(step_config, settings.poll, lab, reporter).with_cancellation_token(token);

    let report = pipeline.run().await?;
    Ok(report.exit_code() as u8)
}

fn validate(settings_path: Option<&Path>, api_version: Option<ApiVersion>) -> Result<u8> {
    let mut settings = load_settings(settings_path)?;
    if let Some(version) = api_version {
        settings.poll.api_version = version;
    }
    let step_config = StepConfig::from_env();

    let test_type = step_config.validate()?;
    let test_matrix = matrix::build_matrix(&step_config)?;

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Test type: {}", test_type);
    println!(
        "  Devices: {}",
        test_matrix.environment_matrix.android_device_list.android_devices.len()
    );
    println!(
        "  Test timeout: {}",
        test_matrix
            .test_specification
            .test_timeout
            .as_deref()
            .unwrap_or("(service default)")
    );
    println!("  API version: {}", settings.poll.api_version);
    println!("  Poll interval: {}s", settings.poll.interval_secs);
    println!(
        "  Wait ceiling: {}s",
        settings
            .poll
            .max_wait(matrix::timeout_secs(&step_config))
            .as_secs()
    );

    Ok(0)
}

fn print_matrix() -> Result<u8> {
    let step_config = StepConfig::from_env();
    let test_matrix = matrix::build_matrix(&step_config)?;
    let json = serde_json::to_string_pretty(&test_matrix)?;
    println!("{}", json);
    Ok(0)
}

fn init_settings(settings_path: Option<&Path>) -> Result<u8> {
    let path = settings_path.unwrap_or(Path::new(DEFAULT_SETTINGS));
    if path.exists() {
        bail!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
    }

    let template = r#"# labrun settings file

[poll]
# API revision the server speaks: "steps" or "matrix"
api_version = "steps"
interval_secs = 5
# Added to test_timeout to form the client-side wait ceiling
grace_secs = 600
# Wait ceiling when no test_timeout is given
default_max_wait_secs = 3600

[report]
junit = false
junit_file = "labrun-junit.xml"
"#;

    std::fs::write(path, template)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the settings as needed, then run:");
    println!("  labrun run");

    Ok(0)
}

fn create_reporter(settings: &Settings, junit_override: Option<PathBuf>) -> MultiReporter {
    let mut multi = MultiReporter::new();

    // Add console reporter
    multi = multi.with_reporter(ConsoleReporter::new());

    // Add JUnit reporter if enabled
    let junit_path = match junit_override {
        Some(path) => Some(path),
        None if settings.report.junit => Some(settings.report.junit_file.clone()),
        None => None,
    };
    if let Some(path) = junit_path {
        multi = multi.with_reporter(JUnitReporter::new(path));
    }

    multi
}
