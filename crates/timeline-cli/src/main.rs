#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use timeline_core::config::{EffectiveConfig, resolve_config};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "timeline: rebuild entity version history from activity logs",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Initialize a timeline project",
        long_about = "Create .timeline/ with a default config and an empty, migrated store.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    tl init\n\n    # Reset the config to defaults\n    tl init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Load versions and activities",
        long_about = "Import JSON-lines version documents and activity records into the store.",
        after_help = "EXAMPLES:\n    # Load both kinds of records\n    tl load --versions versions.jsonl --activities activities.jsonl\n\n    # Append more activities later\n    tl load --activities more.jsonl"
    )]
    Load(cmd::load::LoadArgs),

    #[command(
        about = "Rebuild history backwards from activities",
        long_about = "Undo recorded activities before each entity's earliest version, in chunks, and store the reconstructed versions.",
        after_help = "EXAMPLES:\n    # Rebuild every entity\n    tl reconstruct\n\n    # Rebuild two entities with one worker\n    tl reconstruct --oid 17 --oid 42 --max-workers 1\n\n    # Emit the run report as JSON\n    tl reconstruct --json"
    )]
    Reconstruct(cmd::reconstruct::ReconstructArgs),

    #[command(
        about = "Show an entity's versions",
        after_help = "EXAMPLES:\n    tl show 42\n    tl show 42 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        about = "Check that version chains tile time",
        long_about = "Check that every entity's versions form a gap-free, non-overlapping sequence.",
        after_help = "EXAMPLES:\n    tl verify\n    tl verify --oid 42"
    )]
    Verify(cmd::verify::VerifyArgs),
}

/// Initialize tracing subscriber with `EnvFilter`.
///
/// Filtering is controlled by `TIMELINE_LOG` (e.g. `TIMELINE_LOG=debug`).
/// Output format is controlled by `TIMELINE_LOG_FORMAT`:
/// - `compact` (default): human-readable compact lines
/// - `json`: structured JSON lines
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TIMELINE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "timeline=debug,tl=debug,info"
        } else {
            "timeline=info,tl=info,warn"
        })
    });

    let format = env::var("TIMELINE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(
    cli: &Cli,
    config: anyhow::Result<EffectiveConfig>,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.map_err(|error| error.context(cmd::ConfigInvalid));
    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, project_root),
        Commands::Load(args) => cmd::load::run_load(args, &config?, output, project_root),
        Commands::Reconstruct(args) => {
            cmd::reconstruct::run_reconstruct(args, &config?, output, project_root)
        }
        Commands::Show(args) => cmd::show::run_show(args, &config?, output, project_root),
        Commands::Verify(args) => cmd::verify::run_verify(args, &config?, output, project_root),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = match env::current_dir() {
        Ok(root) => root,
        Err(error) => {
            eprintln!("error: cannot determine working directory: {error}");
            return ExitCode::FAILURE;
        }
    };

    // A broken config file must not hide which output mode was asked for.
    let config = resolve_config(&project_root, cli.json);
    let output = match &config {
        Ok(config) => OutputMode::from_resolved(&config.resolved_output),
        Err(_) if cli.json => OutputMode::Json,
        Err(_) => OutputMode::Text,
    };

    match run(&cli, config, output, &project_root) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if render_error(output, &CliError::from(&error)).is_err() {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_before_and_after_subcommand() {
        let cli = Cli::parse_from(["tl", "--json", "verify"]);
        assert!(cli.json);
        let cli = Cli::parse_from(["tl", "verify", "--json"]);
        assert!(cli.json);
    }

    #[test]
    fn reconstruct_accepts_repeated_oids() {
        let cli = Cli::parse_from([
            "tl",
            "reconstruct",
            "--oid",
            "1",
            "--oid",
            "2",
            "--chunk-size",
            "10",
        ]);
        let Commands::Reconstruct(args) = cli.command else {
            panic!("expected reconstruct");
        };
        assert_eq!(args.oids, vec!["1", "2"]);
        assert_eq!(args.chunk_size, Some(10));
    }

    #[test]
    fn zero_chunk_size_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["tl", "reconstruct", "--chunk-size", "0"]).is_err());
    }

    #[test]
    fn load_requires_an_input_file() {
        assert!(Cli::try_parse_from(["tl", "load"]).is_err());
        assert!(Cli::try_parse_from(["tl", "load", "--activities", "a.jsonl"]).is_ok());
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["tl", "init"],
            vec!["tl", "load", "--versions", "v.jsonl"],
            vec!["tl", "reconstruct"],
            vec!["tl", "show", "x"],
            vec!["tl", "verify"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "Failed to parse: {args:?}: {:?}", result.err());
        }
    }
}
