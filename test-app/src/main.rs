// openevse-cli -- command-line tool for talking to an OpenEVSE charging
// controller over its RAPI serial console.
//
// Usage:
//   openevse-cli --port /dev/ttyUSB0 status
//   openevse-cli --port /dev/ttyUSB0 capacity 24
//   openevse-cli --port /dev/ttyUSB0 --checksum additive version
//   openevse-cli --port /dev/ttyUSB0 raw GE
//   openevse-cli --port /dev/ttyUSB0 monitor --duration 60
//   openevse-cli --host 192.168.1.50 status
//
// Set RUST_LOG=rapi_io=trace to see every frame on the wire.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use openevse::{ChecksumMode, Command as RapiCommand, Evse, EvseBuilder, EvseState};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// openevse-cli -- query and control an OpenEVSE controller.
#[derive(Parser)]
#[command(name = "openevse-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, required_unless_present = "host", conflicts_with = "host")]
    port: Option<String>,

    /// WiFi kit host name or IP address (e.g. 192.168.1.50).
    /// Used instead of --port. The WiFi kit does not relay state change
    /// notifications, so `monitor` and `reset` need a serial link.
    #[arg(long)]
    host: Option<String>,

    /// Override the default baud rate (115200).
    #[arg(long)]
    baud: Option<u32>,

    /// Checksum mode for outgoing commands: xor, additive or none.
    #[arg(long, default_value = "xor")]
    checksum: ChecksumMode,

    /// Per-command reply timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Leave command echo as it is instead of sending `SE 0` on connect.
    #[arg(long)]
    keep_echo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the controller state and elapsed charge time.
    Status,

    /// Enable charging.
    Enable,

    /// Disable charging.
    Disable,

    /// Put the controller to sleep.
    Sleep,

    /// Reboot the controller and wait for it to come back.
    Reset,

    /// Print firmware and protocol versions.
    Version,

    /// Read or set the current capacity (amperes).
    Capacity {
        /// New capacity in amperes. Omit to read.
        amps: Option<u16>,
    },

    /// Print the settings word decoded into its flags.
    Settings,

    /// Print session and lifetime energy.
    Energy,

    /// Print sensor temperatures.
    Temperature,

    /// Print the controller's real-time clock.
    Time,

    /// Send an arbitrary RAPI command and print the reply.
    Raw {
        /// Two-character command code (e.g. GS, SC).
        code: String,
        /// Parameter tokens.
        params: Vec<String>,
    },

    /// Print state change notifications as they arrive.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

async fn connect(cli: &Cli) -> Result<Evse> {
    let mut builder = EvseBuilder::new();
    let target = match (&cli.port, &cli.host) {
        (Some(port), _) => {
            builder = builder.serial_port(port);
            port
        }
        (None, Some(host)) => {
            builder = builder.http_host(host);
            host
        }
        (None, None) => bail!("either --port or --host is required"),
    };
    builder = builder
        .checksum_mode(cli.checksum)
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .disable_echo_on_connect(!cli.keep_echo);
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }
    builder
        .build()
        .await
        .with_context(|| format!("failed to connect to {target}"))
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

async fn cmd_status(evse: &Evse) -> Result<()> {
    let state = evse.status().await?;
    if state.is_fault() {
        println!("State:   {state} (FAULT)");
    } else {
        println!("State:   {state}");
    }
    if state == EvseState::Charging {
        let session = evse.elapsed().await?;
        println!("Elapsed: {}", format_elapsed(session.elapsed));
        println!("Energy:  {:.1} Wh", session.energy_wh);
    }
    Ok(())
}

async fn cmd_version(evse: &Evse) -> Result<()> {
    let version = evse.version().await?;
    println!("Firmware: {}", version.firmware);
    println!("Protocol: {}", version.protocol);
    Ok(())
}

async fn cmd_capacity(evse: &Evse, amps: Option<u16>) -> Result<()> {
    let range = evse.current_capacity_range().await?;
    if let Some(amps) = amps {
        if amps < range.min_amps || amps > range.max_amps {
            bail!(
                "{amps} A is outside the allowed range {}-{} A",
                range.min_amps,
                range.max_amps
            );
        }
        evse.set_current_capacity(amps).await?;
    }
    let current = evse.current_capacity().await?;
    println!(
        "Capacity: {current} A (allowed {}-{} A)",
        range.min_amps, range.max_amps
    );
    Ok(())
}

async fn cmd_settings(evse: &Evse) -> Result<()> {
    let settings = evse.settings().await?;
    let flags = settings.flags;
    println!("Capacity:          {} A", settings.current_capacity);
    println!("Flags:             {:#06x}", flags.0);
    println!("Service level:     {:?}", evse.service_level().await?);
    println!("Diode check:       {}", on_off(flags.diode_check()));
    println!("Vent check:        {}", on_off(flags.vent_required()));
    println!("Ground check:      {}", on_off(flags.ground_check()));
    println!("Stuck relay check: {}", on_off(flags.stuck_relay_check()));
    println!("GFI self-test:     {}", on_off(flags.gfi_self_test()));
    println!("Auto start:        {}", on_off(flags.auto_start()));
    println!("LCD:               {:?}", flags.lcd_type());
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

async fn cmd_energy(evse: &Evse) -> Result<()> {
    let state = evse.status().await?;
    if state == EvseState::Charging {
        let session = evse.elapsed().await?;
        println!("Session:  {:.1} Wh", session.energy_wh);
    } else {
        println!("Session:  (not charging)");
    }
    println!("Lifetime: {} Wh", evse.accumulated_wh().await?);
    Ok(())
}

async fn cmd_temperature(evse: &Evse) -> Result<()> {
    let t = evse.temperatures().await?;
    println!("DS3231:  {:.1} C", t.ds3231);
    println!("MCP9808: {:.1} C", t.mcp9808);
    println!("TMP007:  {:.1} C", t.tmp007);
    Ok(())
}

async fn cmd_time(evse: &Evse) -> Result<()> {
    match evse.time().await {
        Ok(at) => println!("{at}"),
        Err(openevse::Error::NoClock) => println!("(no real-time clock fitted)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_raw(evse: &Evse, code: &str, params: &[String]) -> Result<()> {
    let command = RapiCommand::with_params(code.to_ascii_uppercase(), params);
    match evse.raw(&command).await {
        Ok(reply) => {
            println!("OK {}", reply.params.join(" "));
            Ok(())
        }
        Err(openevse::Error::Rejected { params }) => {
            println!("NK {}", params.join(" "));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_monitor(evse: &Evse, duration_secs: u64) -> Result<()> {
    let mut changes = evse.subscribe();

    println!("Monitoring state changes (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            next = tokio::time::timeout(timeout, changes.recv()) => match next {
                Ok(Some(notification)) if notification.state.is_fault() => {
                    println!("[state] {} (FAULT)", notification.state)
                }
                Ok(Some(notification)) => println!("[state] {}", notification.state),
                Ok(None) => {
                    println!("Connection closed.");
                    break;
                }
                Err(_) => {
                    if deadline.is_some() {
                        println!("Monitor duration elapsed.");
                        break;
                    }
                }
            },
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let evse = connect(&cli).await?;

    let result = match &cli.command {
        Command::Status => cmd_status(&evse).await,
        Command::Enable => evse
            .enable()
            .await
            .map(|state| println!("State: {state}"))
            .map_err(Into::into),
        Command::Disable => evse
            .disable()
            .await
            .map(|state| println!("State: {state}"))
            .map_err(Into::into),
        Command::Sleep => evse
            .sleep()
            .await
            .map(|state| println!("State: {state}"))
            .map_err(Into::into),
        Command::Reset => evse
            .reset()
            .await
            .map(|state| println!("Controller back, state: {state}"))
            .map_err(Into::into),
        Command::Version => cmd_version(&evse).await,
        Command::Capacity { amps } => cmd_capacity(&evse, *amps).await,
        Command::Settings => cmd_settings(&evse).await,
        Command::Energy => cmd_energy(&evse).await,
        Command::Temperature => cmd_temperature(&evse).await,
        Command::Time => cmd_time(&evse).await,
        Command::Raw { code, params } => cmd_raw(&evse, code, params).await,
        Command::Monitor { duration } => cmd_monitor(&evse, *duration).await,
    };

    evse.shutdown().await.ok();
    result
}
