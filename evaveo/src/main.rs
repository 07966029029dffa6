//! evaveo - operator CLI for the EVAVEO VR Manager telemetry SDK
//!
//! This tool provides commands for:
//! - Checking SDK configuration
//! - Sending a one-off custom event to the collector
//! - Running a short demo session with performance snapshots
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/evaveo/config.toml (~/.config/evaveo/config.toml)
//! - Logs: $XDG_STATE_HOME/evaveo/evaveo.log (~/.local/state/evaveo/evaveo.log)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evaveo_core::logging::{self, LoggingGuard};
use evaveo_core::{Config, Payload, PayloadValue, Sdk};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "evaveo")]
#[command(about = "EVAVEO VR Manager telemetry tools")]
#[command(version)]
struct Args {
    /// Verbose output (logs to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// API key (overrides config)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Collector base URL (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show SDK configuration
    Status,

    /// Send one custom event and wait for delivery
    Track {
        /// Event name
        name: String,

        /// Payload field as key=value (repeatable)
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        /// User id stamped on the event
        #[arg(short, long)]
        user: Option<String>,

        /// Seconds to wait for delivery
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },

    /// Run a demo session with performance monitoring
    Run {
        /// Session length in seconds
        #[arg(short, long, default_value_t = 15)]
        seconds: u64,

        /// Simulated frame rate fed to the frame counter
        #[arg(long, default_value_t = 72)]
        fps: u32,

        /// Seconds to wait for delivery after the session ends
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(api_key) = args.api_key {
        config.sdk.api_key = Some(api_key);
    }
    if let Some(api_url) = args.api_url {
        config.sdk.api_url = api_url;
    }
    if args.verbose {
        config.logging.stderr = true;
    }

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Track {
            name,
            data,
            user,
            wait,
        } => cmd_track(&config, &name, &data, user.as_deref(), wait).await,
        Command::Run { seconds, fps, wait } => cmd_run(&config, seconds, fps, wait).await,
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("EVAVEO SDK Configuration");
    println!("========================");
    println!();

    let sdk = &config.sdk;

    println!("Config File:     {}", Config::config_path().display());
    println!("Log File:        {}", logging::log_file_path().display());
    println!("Enabled:         {}", sdk.enabled);
    println!("API URL:         {}", sdk.base_url());
    println!(
        "API Key:         {}",
        sdk.api_key.as_deref().map(mask_key).unwrap_or_else(|| "<not set>".to_string())
    );
    println!(
        "App Name:        {}",
        sdk.app_name.as_deref().unwrap_or("<not set>")
    );
    println!("Timeout:         {}s", config.delivery.timeout_secs);

    let perf = &config.performance;
    if perf.enabled {
        println!(
            "Performance:     every {}s (fps: {}, battery: {})",
            perf.interval().as_secs_f64(),
            perf.track_fps,
            perf.track_battery
        );
    } else {
        println!("Performance:     disabled");
    }

    println!();
    match sdk.validate() {
        Ok(()) => println!("Status: Ready to track"),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Set an API key in config.toml:");
            println!();
            println!("  [sdk]");
            println!("  api_key = \"vr_live_xxxxxxxxxxxx\"");
        }
    }

    Ok(())
}

async fn cmd_track(
    config: &Config,
    name: &str,
    data: &[String],
    user: Option<&str>,
    wait: u64,
) -> Result<()> {
    config.sdk.validate().context("SDK is not configured")?;

    let payload = data
        .iter()
        .map(|field| parse_field(field))
        .collect::<Result<Payload>>()?;

    let sdk = Sdk::current()?;
    let _log_guard = init_logging(config, &sdk)?;

    sdk.initialize_with(config);
    if !sdk.is_initialized() {
        bail!("SDK failed to initialize; see {}", logging::log_file_path().display());
    }
    if let Some(user) = user {
        sdk.set_user_id(user);
    }

    sdk.track_event(name, (!payload.is_empty()).then_some(payload));
    let idle = sdk.wait_idle(Duration::from_secs(wait)).await;

    print_stats(&sdk);
    if !idle {
        bail!("events still pending after {}s", wait);
    }
    println!("Event '{}' delivered", name);
    Ok(())
}

async fn cmd_run(config: &Config, seconds: u64, fps: u32, wait: u64) -> Result<()> {
    config.sdk.validate().context("SDK is not configured")?;

    let sdk = Sdk::current()?;
    let _log_guard = init_logging(config, &sdk)?;

    sdk.initialize_with(config);
    if !sdk.is_initialized() {
        bail!("SDK failed to initialize; see {}", logging::log_file_path().display());
    }
    let session_id = sdk
        .session()
        .and_then(|s| s.session_id())
        .unwrap_or_else(|| "<none>".to_string());
    println!("Session {} started, running for {}s (Ctrl+C to stop)", session_id, seconds);
    tracing::info!(%session_id, seconds, fps, "Demo session running");

    let frames = sdk.frame_counter();
    let mut frame_ticks = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    let mut elapsed: i64 = 0;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, ending session");
                break;
            }
            _ = frame_ticks.tick() => frames.record_frame(),
            _ = heartbeat.tick() => {
                sdk.track_event("demo_heartbeat", Some(Payload::new().with("second", elapsed)));
                elapsed += 1;
            }
        }
    }

    sdk.on_application_quit();
    let idle = sdk.wait_idle(Duration::from_secs(wait)).await;

    print_stats(&sdk);
    if !idle {
        bail!("events still pending after {}s", wait);
    }
    Ok(())
}

/// Logging with ERROR events reported through the SDK's crash handler
fn init_logging(config: &Config, sdk: &Sdk) -> Result<LoggingGuard> {
    logging::init(&config.logging, Some(sdk.crash_handler().layer()))
        .context("failed to initialize logging")
}

fn print_stats(sdk: &Sdk) {
    if let Some(stats) = sdk.stats() {
        println!();
        println!("Delivery:");
        println!("  Attempts:      {}", stats.attempts);
        println!("  Delivered:     {}", stats.delivered);
        println!("  Failures:      {}", stats.failures);
        println!("  Pending:       {}", stats.pending);
    }
}

/// `key=value` into a payload entry; values that parse as bool, integer or
/// finite float keep that type
fn parse_field(field: &str) -> Result<(String, PayloadValue)> {
    let Some((key, raw)) = field.split_once('=') else {
        bail!("invalid payload field '{}', expected KEY=VALUE", field);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("invalid payload field '{}', empty key", field);
    }

    let value = if let Ok(b) = raw.parse::<bool>() {
        PayloadValue::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        PayloadValue::Integer(i)
    } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
        PayloadValue::Float(f)
    } else {
        PayloadValue::Text(raw.to_string())
    };
    Ok((key.to_string(), value))
}

/// Show only the first four characters of an API key
fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}********", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_types() {
        assert_eq!(
            parse_field("correct=true").unwrap(),
            ("correct".to_string(), PayloadValue::Bool(true))
        );
        assert_eq!(
            parse_field("score=85").unwrap(),
            ("score".to_string(), PayloadValue::Integer(85))
        );
        assert_eq!(
            parse_field("height=1.5").unwrap(),
            ("height".to_string(), PayloadValue::Float(1.5))
        );
        assert_eq!(
            parse_field("moduleId=safety=01").unwrap(),
            ("moduleId".to_string(), PayloadValue::Text("safety=01".to_string()))
        );
        for raw in ["nan", "inf", "-infinity"] {
            assert_eq!(
                parse_field(&format!("x={raw}")).unwrap(),
                ("x".to_string(), PayloadValue::Text(raw.to_string()))
            );
        }
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("vr_live_abc"), "vr_l********");
        assert_eq!(mask_key("abc"), "****");
    }
}
