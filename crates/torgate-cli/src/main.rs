//! Torgate CLI
//!
//! Operator front end for the routing policy. Loads settings, then
//! reports status, runs the interactive connection test, or performs
//! the same pre-flight check a scan would.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use std::process::ExitCode;
use std::sync::Arc;
use torgate::{RoutingControl, RoutingError, RoutingSettings, RoutingStatus};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit code when the pre-flight check blocks network access
const EXIT_BLOCKED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so --json output stays parseable
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Cli::parse();

    let settings = match &args.config {
        Some(path) => RoutingSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => RoutingSettings::default(),
    };

    match args.command {
        Command::Defaults => {
            let defaults = RoutingSettings::default();
            let text = if args.json { defaults.to_json()? } else { defaults.to_toml()? };
            println!("{}", text);
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let control = control(&settings)?;
            if let Err(e) = apply_enabled(&control, &settings).await {
                warn!("{}", e);
            }
            print_status(&control.status().await, args.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Test => {
            let control = control(&settings)?;
            let report = control.test_connection().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in report.messages() {
                    println!("[TOR] {}", line);
                }
                println!("{}", report.status_text());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => check(&settings, args.json).await,
    }
}

fn control(settings: &RoutingSettings) -> Result<RoutingControl> {
    let policy = settings.build_policy().context("Invalid routing settings")?;
    Ok(RoutingControl::new(Arc::new(policy)))
}

/// Turn routing on if the settings ask for it
async fn apply_enabled(control: &RoutingControl, settings: &RoutingSettings) -> Result<(), RoutingError> {
    if settings.enabled {
        let state = control.set_enabled(true).await?;
        info!("Tor routing: {}", state);
    }
    Ok(())
}

async fn check(settings: &RoutingSettings, json: bool) -> Result<ExitCode> {
    let control = control(settings)?;

    let outcome = match apply_enabled(&control, settings).await {
        Ok(()) => control.policy().ensure_or_fail().await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(decision) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&decision)?);
            } else {
                match &decision.proxy_url {
                    Some(proxy) if decision.verified => println!("Permitted via {} (Tor verified)", proxy),
                    Some(proxy) => println!("Permitted via {} (not verified)", proxy),
                    None => println!("Permitted (Tor routing disabled, direct connections)"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if json {
                let body = serde_json::json!({
                    "permitted": false,
                    "reason": e.kind(),
                    "error": e.to_string(),
                    "remediation": e.kind().remediation(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Blocked: {}", e);
                println!("{}", e.kind().remediation());
            }
            Ok(ExitCode::from(EXIT_BLOCKED))
        }
    }
}

fn print_status(status: &RoutingStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Tor routing:     {}", status.state);
    println!("Proxy:           {}:{}", status.host, status.port);
    println!("Enabled:         {}", yes_no(status.enabled));
    println!("Fail-closed:     {}", yes_no(status.fail_closed));
    println!("Proxy reachable: {}", yes_no(status.proxy_reachable));
    println!("Tor verified:    {}", yes_no(status.network_verified));
    Ok(())
}
