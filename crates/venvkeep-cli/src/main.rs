use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use venvkeep_store::{default_principal_root, default_system_root, Config, EnvLayout};

mod flows;
mod render;
mod routing;

use render::OutputStyle;
use routing::RouteTarget;

#[derive(Parser, Debug)]
#[command(name = "venvkeep")]
#[command(about = "Recoverable pip environments: journaled history, undo and snapshots", long_about = None)]
struct Cli {
    /// Operate on this environment root instead of the routed default.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Plain output: no color, no progress bars.
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the managed environment and capture its baseline snapshot.
    Init {
        #[arg(long)]
        force: bool,
        /// Base interpreter to build the environment with (default: first
        /// python3/python on PATH).
        #[arg(long)]
        python: Option<PathBuf>,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show environment health, package count and recent activity.
    Status,
    /// List journaled operations, most recent first.
    History {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        detailed: bool,
    },
    /// Show the change set of the Nth most recent operation (default 1).
    Diff { n: Option<u64> },
    /// Rebuild the environment as it was before the Nth-last operation.
    Undo {
        n: Option<u64>,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Reset the environment to empty, or to the baseline snapshot.
    Clean {
        #[arg(long)]
        keep_baseline: bool,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Save the current package set under a name.
    Snapshot {
        name: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Rebuild the environment from a named snapshot.
    Restore {
        name: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List named snapshots.
    ListSnapshots,
    /// Write a shareable environment file into the current directory.
    Share { name: String },
    /// Rebuild the environment from a shared environment file.
    Import {
        file: PathBuf,
        #[arg(short = 'y', long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Check environment health; --fix repairs what it safely can.
    Doctor {
        #[arg(long)]
        fix: bool,
    },
    /// Show or change configuration (`config`, `config <key>`, `config <key> <value>`).
    Config {
        key: Option<String>,
        value: Option<String>,
    },
    /// Run a pip command against the routed environment, journaled.
    Pip {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<venvkeep_core::Error>()
                .map(venvkeep_core::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, 255) as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let layout = managed_layout(cli.root.as_deref())?;
    let config = Config::load(&layout)?;
    let style = output_style(cli.plain, &config);
    let principal = routing::principal();
    let command_line = invocation_line();

    match cli.command {
        Commands::Init { force, python, yes } => {
            flows::run_init(&layout, &config, style, force, python, yes)
        }
        Commands::Status => flows::run_status(&layout, &config, style),
        Commands::History { limit, detailed } => {
            flows::run_history(&layout, limit, detailed, style)
        }
        Commands::Diff { n } => flows::run_diff(&layout, n.unwrap_or(1), style),
        Commands::Undo { n, yes } => flows::run_undo(
            &layout,
            &config,
            style,
            n.unwrap_or(1),
            yes,
            &principal,
            &command_line,
        ),
        Commands::Clean { keep_baseline, yes } => flows::run_clean(
            &layout,
            &config,
            style,
            keep_baseline,
            yes,
            &principal,
            &command_line,
        ),
        Commands::Snapshot { name, yes } => flows::run_snapshot(&layout, style, &name, yes),
        Commands::Restore { name, yes } => flows::run_restore(
            &layout,
            &config,
            style,
            &name,
            yes,
            &principal,
            &command_line,
        ),
        Commands::ListSnapshots => flows::run_list_snapshots(&layout),
        Commands::Share { name } => {
            let out_dir = std::env::current_dir().context("failed to resolve working directory")?;
            flows::run_share(&layout, style, &name, &out_dir, &principal)
        }
        Commands::Import { file, yes, dry_run } => flows::run_import(
            &layout,
            &config,
            style,
            &file,
            yes,
            dry_run,
            &principal,
            &command_line,
        ),
        Commands::Doctor { fix } => flows::run_doctor(&layout, &config, style, fix),
        Commands::Config { key, value } => flows::run_config(&layout, config.clone(), key, value, style),
        Commands::Pip { args } => {
            let working_dir =
                std::env::current_dir().context("failed to resolve working directory")?;

            // An explicit --root pins the target; otherwise the resolver
            // picks foreground, system or per-principal.
            if cli.root.is_none() {
                let route = routing::resolve_route(
                    routing::caller_is_privileged(),
                    routing::detect_foreground_env().as_deref(),
                );
                if let RouteTarget::Foreground(venv) = route {
                    return flows::run_foreground_pip(&venv, &args, style);
                }
            }

            flows::run_pip_command(
                &layout,
                &config,
                style,
                &principal,
                &command_line,
                &args,
                &working_dir,
            )
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "venvkeep",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

/// Root for management commands: explicit override first, then the routing
/// rule without foreground (a project venv carries no venvkeep layout).
fn managed_layout(root_override: Option<&Path>) -> Result<EnvLayout> {
    if let Some(root) = root_override {
        return Ok(EnvLayout::new(root));
    }

    let root = match routing::resolve_route(routing::caller_is_privileged(), None) {
        RouteTarget::System => default_system_root()?,
        _ => default_principal_root()?,
    };
    Ok(EnvLayout::new(root))
}

fn output_style(plain_flag: bool, config: &Config) -> OutputStyle {
    if plain_flag
        || !config.ui.color
        || std::env::var_os("NO_COLOR").is_some()
        || !std::io::stdout().is_terminal()
    {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

/// The originating invocation as journaled: argv with the binary path
/// reduced to its base name.
fn invocation_line() -> String {
    let mut parts: Vec<String> = std::env::args().collect();
    if let Some(first) = parts.first_mut() {
        *first = Path::new(first.as_str())
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("venvkeep")
            .to_string();
    }
    parts.join(" ")
}
