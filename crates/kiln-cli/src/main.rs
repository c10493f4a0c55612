//! `kiln-cli` – the `kiln` binary.
//!
//! ```text
//! kiln [profile.json]
//! ```
//!
//! 1. Initialises tracing (see `kiln_runtime::telemetry`).
//! 2. Loads `~/.kiln/config.toml`, writing the defaults on first run.  A
//!    config file that does not parse aborts start-up.
//! 3. Attaches a simulated oven and starts the watcher.
//! 4. Prints every snapshot the watcher publishes.
//! 5. If a profile was given, fires it and exits when the run ends.
//!    **Ctrl-C** stops the oven and exits at any time.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use kiln_middleware::ChannelSink;
use kiln_runtime::{KilnController, SimulatedOven, telemetry};
use kiln_types::{EngineSnapshot, EngineState, KilnConfig, KilnError, Profile};
use tokio::sync::watch;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("kiln");

    print_banner();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let profile = match std::env::args().nth(1).map(|path| load_profile(&path)).transpose() {
        Ok(p) => p,
        Err(e) => {
            println!("{}: {}", "Profile error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}: {}", "Error".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: KilnConfig, profile: Option<Profile>) -> Result<(), KilnError> {
    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let (interrupt_tx, mut interrupted) = watch::channel(false);
    let interrupt_tx = Arc::new(interrupt_tx);
    let handler_tx = Arc::clone(&interrupt_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the oven …".yellow().bold());
        handler_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    // ── Engine + watcher ──────────────────────────────────────────────────
    let mut controller = KilnController::new(&cfg);
    let (oven, clock) = SimulatedOven::from_config(&cfg);
    controller.swap_oven(Box::new(oven), clock)?;

    let watcher = controller.watcher();
    let (sink, mut messages) = ChannelSink::new();
    watcher.add_observer(Box::new(sink))?;
    let (stop_watcher, watcher_stop_rx) = watch::channel(false);
    let watcher_task = Arc::clone(&watcher).spawn(watcher_stop_rx);

    let currency = cfg.cost.currency.clone();
    let printer = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if let Some(line) = render_message(&message, &currency) {
                println!("{line}");
            }
        }
    });

    let exit_when_done = profile.is_some();
    if let Some(profile) = profile {
        println!("  Firing {} ({:.0} s)\n", profile.name().bold(), profile.duration());
        controller.run_profile(profile, 0.0)?;
    } else {
        println!("  No profile given; idling.  Press {} to exit.\n", "Ctrl-C".bold());
    }

    let mut snapshots = controller.subscribe();
    loop {
        tokio::select! {
            _ = interrupted.changed() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let (state, fired) = {
                    let s = snapshots.borrow_and_update();
                    (s.state, s.profile_name.is_some())
                };
                if exit_when_done && fired && state.is_terminal() {
                    info!(%state, "run finished");
                    break;
                }
            }
        }
    }

    drop(interrupt_tx);
    let _ = controller.stop();
    let _ = stop_watcher.send(true);
    let _ = watcher_task.await;
    printer.abort();
    let last = tokio::task::spawn_blocking(move || {
        controller.shutdown();
        controller.snapshot()
    })
    .await
    .map_err(|e| KilnError::Io(e.to_string()))?;

    println!();
    println!(
        "  {} {}  cost {}{:.2}",
        "✓".green().bold(),
        last.state,
        cfg.cost.currency,
        last.cost
    );
    Ok(())
}

fn load_config() -> Result<KilnConfig, KilnError> {
    match config::load()? {
        Some(cfg) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            Ok(cfg)
        }
        None => {
            let mut cfg = KilnConfig::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            config::apply_env_overrides(&mut cfg);
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

fn load_profile(path: &str) -> Result<Profile, KilnError> {
    let raw = std::fs::read_to_string(path).map_err(|e| KilnError::Io(format!("{path}: {e}")))?;
    Profile::from_json(&raw)
}

/// One status line for a watcher message, or `None` for messages that are
/// not snapshots.
fn render_message(message: &str, currency: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    if value.get("type").and_then(|t| t.as_str()) == Some("backlog") {
        let points = value["log"].as_array().map_or(0, Vec::len);
        return Some(format!("  backlog: {points} point(s)").dimmed().to_string());
    }
    let snapshot: EngineSnapshot = serde_json::from_value(value).ok()?;
    Some(render_snapshot(&snapshot, currency))
}

fn render_snapshot(s: &EngineSnapshot, currency: &str) -> String {
    let state = match s.state {
        EngineState::Running => s.state.to_string().green(),
        EngineState::Complete => s.state.to_string().cyan(),
        EngineState::Aborted => s.state.to_string().red().bold(),
        EngineState::Idle | EngineState::Stopped => s.state.to_string().dimmed(),
    };
    format!(
        "  {:<9} {:>7.1}° → {:>7.1}°  heat {:>3.0}%  {:>6.0}/{:.0} s  {}{:.2}",
        state,
        s.temperature,
        s.target,
        s.heat_fraction * 100.0,
        s.elapsed_seconds,
        s.total_duration,
        currency,
        s.cost
    )
}

fn print_banner() {
    println!();
    println!("{}", r#"   __ __ _ __     "#.bold().red());
    println!("{}", r#"  / //_/(_) /__   "#.bold().red());
    println!("{}", r#" / ,<  / / / _ \  "#.bold().red());
    println!("{}", r#"/_/|_|/_/_/_//_/  "#.bold().red());
    println!();
    println!("  {} {}", "kiln".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Profile-driven kiln controller");
    println!();
}
