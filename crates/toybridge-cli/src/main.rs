//! `toybridge-cli` – the `toybridge` binary.
//!
//! 1. Loads `~/.toybridge/config.toml`; on first run writes a default file
//!    and exits so the user can fill in their avatar parameters.
//! 2. Builds one driver per protocol in use (Lovense Connect, Buttplug,
//!    simulated), discovers toys, writes new toys into free slots and saves
//!    the config.
//! 3. Binds the OSC listener and runs the bridge loop until **Ctrl-C**, then
//!    stops every active toy and prints a summary.

mod config;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info, warn};

use toybridge_hal::{ActuatorDriver, LovenseConnect, Protocol, SimDriver};
use toybridge_middleware::OscReceiver;
use toybridge_runtime::{BridgeLoop, BridgeStats, CommandChannel, SignalMapper, telemetry};
use toybridge_types::ToyId;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = telemetry::init_tracing() {
        eprintln!("tracing already initialised: {e}");
    }

    print_banner();

    match run().await {
        Ok(Some(stats)) => {
            print_summary(&stats);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "toybridge cannot start");
            println!("  {} {}", "✗".red().bold(), e.as_str().red());
            ExitCode::FAILURE
        }
    }
}

/// Everything from config load to loop exit.  `Ok(None)` means the default
/// config was just written and there is nothing to run yet.
async fn run() -> Result<Option<BridgeStats>, String> {
    // ── Configuration ─────────────────────────────────────────────────────
    let path = config::config_path();
    let mut cfg = match config::load()? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        None => {
            config::save(&config::Config::default())?;
            println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            println!("  Enter your avatar parameter names and the Lovense Connect address, then run again.");
            return Ok(None);
        }
    };
    cfg.validate()?;

    // ── Drivers and discovery ─────────────────────────────────────────────
    let timeout = Duration::from_millis(cfg.command_timeout_ms);
    let mut drivers: Vec<Box<dyn ActuatorDriver>> = Vec::new();

    if cfg.uses_protocol(Protocol::Lovense) {
        let lovense = LovenseConnect::new(&cfg.lovense_url, timeout).map_err(|e| e.to_string())?;
        println!("\n  Scanning toys through Lovense Connect at {} …", lovense.base_url().dimmed());
        drivers.push(Box::new(lovense));
    }
    if cfg.uses_protocol(Protocol::Buttplug) {
        drivers.push(buttplug_driver(&cfg)?);
    }
    if cfg.uses_protocol(Protocol::Simulated) {
        drivers.push(Box::new(SimDriver::new(cfg.toys_for(Protocol::Simulated))));
    }

    let mut found = Vec::new();
    for driver in &mut drivers {
        let protocol = driver.protocol();
        let toys = match driver.discover().await {
            Ok(toys) => toys,
            Err(e) => {
                warn!(error = %e, %protocol, "discovery failed");
                continue;
            }
        };
        info!(toys = toys.len(), %protocol, "discovery finished");
        for toy in &toys {
            println!("  {} Toy found: {} ({})", "✓".green().bold(), toy.to_string().bold(), protocol);
        }
        let assigned = cfg.assign_discovered(protocol, &toys)?;
        if !assigned.is_empty() {
            config::save(&cfg)?;
            info!(toys = ?assigned, %protocol, "new toys saved to config");
        }
        found.extend(toys);
    }

    cfg.retain_discovered(&found);
    if cfg.named_toys().next().is_none() {
        return Err(
            "Cannot find a toy. Make sure your toy is connected to Lovense Connect (or paired over Bluetooth) and the config is correct."
                .to_string(),
        );
    }
    cfg.validate()?;

    // ── Bridge ────────────────────────────────────────────────────────────
    let table = cfg.channel_table();
    for spec in &table {
        println!("    • {} ← {}", spec.channel.to_string().bold(), spec.address.dimmed());
    }
    let mapper = SignalMapper::new(table).map_err(|e| e.to_string())?;

    let addr: SocketAddr = format!("{}:{}", cfg.osc_host, cfg.osc_port)
        .parse()
        .map_err(|e| format!("Invalid OSC address {}:{}: {}", cfg.osc_host, cfg.osc_port, e))?;
    let receiver = OscReceiver::bind(addr).map_err(|e| e.to_string())?;

    let mut bridge = BridgeLoop::new(receiver, mapper, cfg.bridge_settings());
    for driver in drivers {
        let toys: Vec<ToyId> = cfg.toys_for(driver.protocol());
        bridge.add_endpoint(toys, CommandChannel::new(driver, cfg.command_settings()));
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let stop = bridge.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping toys …".yellow().bold());
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; toys will not be stopped on exit");
    }

    println!();
    println!("  Listening for OSC on {}. Press {} to stop.\n", addr.to_string().bold(), "Ctrl-C".bold().cyan());

    Ok(Some(bridge.run().await))
}

#[cfg(feature = "buttplug")]
fn buttplug_driver(cfg: &config::Config) -> Result<Box<dyn ActuatorDriver>, String> {
    println!("\n  Scanning Bluetooth toys through Buttplug for {} ms …", cfg.buttplug_scan_ms);
    Ok(Box::new(toybridge_hal::ButtplugDriver::new(cfg.buttplug_settings())))
}

#[cfg(not(feature = "buttplug"))]
fn buttplug_driver(_cfg: &config::Config) -> Result<Box<dyn ActuatorDriver>, String> {
    Err("This build has no Buttplug support: rebuild with `--features buttplug`".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  ┌┬┐┌─┐┬ ┬┌┐ ┬─┐┬┌┬┐┌─┐┌─┐"#.bold().magenta());
    println!("{}", r#"   │ │ │└┬┘├┴┐├┬┘│ │││ ┬├┤ "#.bold().magenta());
    println!("{}", r#"   ┴ └─┘ ┴ └─┘┴└─┴─┴┘└─┘└─┘"#.bold().magenta());
    println!();
    println!("  {} {}", "toybridge".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Avatar parameters to haptic toys");
    println!();
}

fn print_summary(stats: &BridgeStats) {
    println!();
    println!("  {}", "Session summary".bold());
    println!("    samples received   {}", stats.samples);
    println!("    commands accepted  {}", stats.dispatched.to_string().green());
    println!(
        "    skipped            {} unchanged, {} duplicate, {} busy, {} rate-limited, {} downsampled",
        stats.suppressed, stats.skipped_duplicate, stats.skipped_pending, stats.rate_limited, stats.downsampled
    );
    println!("    failed             {}", stats.failed.to_string().yellow());
    println!("    failsafe stops     {}", stats.failsafe_stops);
    println!();
}
