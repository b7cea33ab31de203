// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod metrics;
pub mod store;
pub mod trigger;
pub mod types;
pub mod watch;
pub mod workflow;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::ConfigFile;
use crate::engine::EngineBuilder;
use crate::workflow::{ExitTarget, LinkKind};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, starts the engine (watcher included unless `--once`),
/// ingests what is already waiting and runs until Ctrl-C.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let engine = EngineBuilder::new(cfg).watch(!args.once).start().await?;
    let started = engine.scan_watched_dirs()?;
    info!(started, "initial scan of watched directories complete");

    if args.once {
        engine.wait_idle().await;
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C received");
    }

    let report = engine.shutdown().await?;
    debug!(?report, "shutdown complete");
    Ok(())
}

/// Print the validated workflow without running anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("ingestflow dry-run");
    println!(
        "  engine.shared_directory = {}",
        cfg.engine.shared_directory.display()
    );
    println!("  engine.worker_capacity = {}", cfg.engine.worker_capacity);
    println!("  engine.trigger_capacity = {}", cfg.engine.trigger_capacity);
    println!("  engine.store = {:?}", cfg.engine.store);
    println!();

    println!("watched directories ({}):", cfg.watched_directories.len());
    for w in cfg.watched_directories.iter() {
        println!("  - {} ({}) -> {}", w.path, w.unit_type, w.link);
    }
    println!();

    println!("links ({}):", cfg.graph.len());
    for id in cfg.graph.ids() {
        let Some(link) = cfg.graph.get(id) else { continue };
        match &link.kind {
            LinkKind::Task(t) => println!("  - {id} [task: {} {:?}]", t.script, t.arguments),
            LinkKind::SetVariable { variable, value } => {
                println!("  - {id} [set_variable: {variable} = {value}]")
            }
            LinkKind::LinkPull { variable } => println!("  - {id} [link_pull: {variable}]"),
            LinkKind::Choice { choices } => println!("  - {id} [choice: {choices:?}]"),
        }
        for entry in link.exit_codes.entries() {
            match &entry.target {
                ExitTarget::Link(next) => println!("      -> {next}"),
                ExitTarget::Terminal(t) => println!("      -> ({t:?})"),
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
