//! hostprepctl - guided provisioning of a KVM hypervisor host

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostprep_common::config::DEFAULT_CONFIG_PATH;
use hostprep_common::prompt::TerminalPrompter;
use hostprep_common::state::DEFAULT_STATE_DIR;
use hostprepctl::app::{summary_exit_code, App};
use hostprepctl::{logging, menu};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hostprepctl")]
#[command(about = "Resumable, step-by-step provisioning of a KVM host", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding state.env and the conflict log
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Preview only: log mutating commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,

    /// Run every remaining step, resuming from saved progress
    RunAll,

    /// Run one step
    Run {
        /// Step number (1-based) or id, e.g. "4" or "04_nic_rename"
        step: String,
    },

    /// Show or change configuration
    Config {
        /// Set a value (KEY=VALUE), may be repeated
        #[arg(long)]
        set: Vec<String>,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Read-only checks of the finished installation
    Validate,

    /// Show progress and selected NICs
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// List the step catalog
    Steps,

    /// Forget step progress; NIC selections are kept
    ResetProgress,
}

fn run(cli: Cli) -> Result<i32> {
    let app = App::new(cli.config, cli.state_dir, cli.dry_run)?;
    let mut prompter = TerminalPrompter::new();

    let code = match cli.command.unwrap_or(Commands::Menu) {
        Commands::Menu => {
            menu::run(&app, &mut prompter)?;
            0
        }
        Commands::RunAll => summary_exit_code(&app.run_all(&mut prompter)?),
        Commands::Run { step } => app.run_step(&step, &mut prompter)?.code(),
        Commands::Config { set, show } => {
            let config = app.configure(&set)?;
            if show || set.is_empty() {
                for entry in config.entries() {
                    let marker = if entry.is_default { "  # default" } else { "" };
                    println!("{}={}{}", entry.key, entry.value, marker);
                }
            }
            0
        }
        Commands::Validate => {
            let report = app.validate();
            report.print();
            if report.passed() {
                0
            } else {
                1
            }
        }
        Commands::Status { json } => {
            let report = app.status();
            if json {
                println!("{}", report.to_json()?);
            } else {
                report.print();
            }
            0
        }
        Commands::Steps => {
            app.print_steps();
            0
        }
        Commands::ResetProgress => {
            app.reset_progress()?;
            println!("Progress cleared; the next run starts at step 1.");
            0
        }
    };
    Ok(code)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    info!("hostprepctl {} starting", env!("CARGO_PKG_VERSION"));

    let code = run(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
