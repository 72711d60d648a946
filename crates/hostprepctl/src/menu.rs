//! Interactive main menu

use anyhow::Result;
use console::style;
use hostprep_common::config::ConfigEntry;
use hostprep_common::error::ProvisionError;
use hostprep_common::prompt::Prompter;
use owo_colors::OwoColorize;
use tracing::{error, info};

use crate::app::App;

const ITEMS: &[&str] = &[
    "Run all remaining steps",
    "Run a single step",
    "Edit configuration",
    "Validate installation",
    "Show status",
    "Help",
    "Exit",
];

const HELP: &str = "\
Steps run in catalog order. Progress is saved after every finished step,
so an interrupted or rebooted host resumes where it stopped.

  Run all             continue from the first unfinished step
  Run a single step   run one step regardless of progress
  Edit configuration  change a value in hostprep.conf
  Validate            read-only checks of the finished installation

Answer q at any prompt to back out.";

fn print_header(app: &App) {
    let config = app.load_config();
    let total = app.registry().len();
    let done = app.store().resume_point(app.registry());
    println!();
    println!("{}", "hostprep".bold());
    println!(
        "  {} {}  {} {}/{}",
        "version".dimmed(),
        config.product_version(),
        "progress".dimmed(),
        done,
        total
    );
    if config.dry_run() {
        println!("  {}", "dry-run: no changes will be made".yellow());
    }
}

/// Menu loop; returns when the operator exits or backs out.
/// A failed action returns to the menu, except a failed state save.
pub fn run(app: &App, prompter: &mut dyn Prompter) -> Result<()> {
    let options: Vec<String> = ITEMS.iter().map(|s| s.to_string()).collect();
    loop {
        print_header(app);
        let choice = match prompter.choose("Select an action", &options) {
            Ok(choice) => choice,
            Err(_) => return Ok(()),
        };
        info!("menu: {}", ITEMS[choice]);
        // A failure in one action returns to the menu.
        let outcome = match choice {
            0 => app.run_all(prompter).map(|_| ()),
            1 => run_single(app, prompter),
            2 => edit_config(app, prompter),
            3 => {
                app.validate().print();
                Ok(())
            }
            4 => {
                app.status().print();
                Ok(())
            }
            5 => {
                println!("{}", HELP);
                Ok(())
            }
            _ => return Ok(()),
        };
        if let Err(e) = outcome {
            error!("menu action failed: {:#}", e);
            println!("{} {:#}", style("error:").red().bold(), e);
            // Progress on disk no longer matches the host; the session ends.
            if is_state_persist(&e) {
                return Err(e);
            }
        }
    }
}

fn is_state_persist(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::StatePersist { .. })
        )
    })
}

fn run_single(app: &App, prompter: &mut dyn Prompter) -> Result<()> {
    let steps: Vec<String> = app
        .registry()
        .iter()
        .map(|s| format!("{:<20} {}", s.id, s.display_name))
        .collect();
    let index = match prompter.choose("Which step?", &steps) {
        Ok(index) => index,
        Err(_) => return Ok(()),
    };
    app.run_step(&(index + 1).to_string(), prompter)?;
    Ok(())
}

fn format_entry(entry: &ConfigEntry) -> String {
    let marker = if entry.is_default { " (default)" } else { "" };
    format!("{} = {}{}", entry.key, entry.value, marker)
}

fn edit_config(app: &App, prompter: &mut dyn Prompter) -> Result<()> {
    let entries = app.load_config().entries();
    let labels: Vec<String> = entries.iter().map(format_entry).collect();
    let Ok(index) = prompter.choose("Which setting?", &labels) else {
        return Ok(());
    };
    let entry = &entries[index];
    let Ok(value) = prompter.input(&format!("New value for {}", entry.key), Some(&entry.value))
    else {
        return Ok(());
    };
    app.configure(&[format!("{}={}", entry.key, value)])?;
    prompter.notify(&format!("{} saved.", entry.key));
    Ok(())
}
