//! KnxFtp
//!
//! File system access and firmware updates for devices on the KNX bus.

use std::error::Error as StdError;
use std::io::{self, BufRead};
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use client::config::{config_dir, named_config_path, Config, ConnectionKind, DEFAULT_CONFIG_NAME};
use client::protocol::{BusConnection, DeviceSession, FileTransferService, ProtocolError};
use client::router::{listing_line, parse_line, Command, CommandOutput, CommandRouter, RouterError};
use client::session::{SessionError, SessionOptions, TransferSession, EXIT_FAILURE};
use client::ui::{console, ConsoleObserver, ConsolePrompt};
use client::virtual_device::VirtualDevice;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// KnxFtp - file system access and firmware updates over the KNX bus.
#[derive(Parser, Debug)]
#[command(name = "knxftp")]
#[command(version, about, long_about = None, disable_help_subcommand = true)]
pub struct Cli {
    /// Name of the configuration to use
    #[arg(long, global = true, value_name = "NAME", default_value = DEFAULT_CONFIG_NAME)]
    pub config: String,

    /// Enable verbose logging and full error causes
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Individual address of the device
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub pa: Option<String>,

    /// IP address of the KNXnet/IP gateway
    #[arg(long, global = true, value_name = "IP")]
    pub gw: Option<String>,

    /// UDP port of the gateway
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Individual address of the gateway
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub ga: Option<String>,

    /// Source address for routing
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub gs: Option<String>,

    /// How to reach the bus
    #[arg(long, global = true, value_enum)]
    pub connect: Option<ConnectionKind>,

    /// Package size in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    pub pkg: Option<usize>,

    /// Pause between packages in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub delay: Option<u64>,

    /// Flash firmware without checking the application on the device
    #[arg(long, global = true)]
    pub force: bool,

    /// Always start uploads from the beginning
    #[arg(long, global = true)]
    pub no_resume: bool,

    /// Seconds to wait for the device to answer
    #[arg(long, global = true, value_name = "SECS")]
    pub device_timeout: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Override configuration values given on the command line.
    fn apply_to(&self, config: &mut Config) {
        let connection = &mut config.connection;
        if let Some(kind) = self.connect {
            connection.kind = kind;
        }
        if let Some(gateway) = &self.gw {
            connection.gateway = gateway.clone();
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(address) = &self.ga {
            connection.gateway_address = address.clone();
        }
        if let Some(address) = &self.gs {
            connection.source_address = Some(address.clone());
        }
        if let Some(address) = &self.pa {
            connection.device_address = address.clone();
        }

        let transfer = &mut config.transfer;
        if let Some(package_size) = self.pkg {
            transfer.package_size = package_size;
        }
        if let Some(delay) = self.delay {
            transfer.package_delay_ms = delay;
        }
        if let Some(timeout) = self.device_timeout {
            transfer.device_timeout_secs = timeout;
        }
    }

    /// Session options for this run. `--force` and `--no-resume` apply to
    /// this run only and are never persisted.
    fn session_options(&self, config: &Config) -> SessionOptions {
        let mut options = SessionOptions::from_config(&config.transfer, self.force);
        if self.no_resume {
            options.resume = false;
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(e.as_ref(), verbose);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Initialize tracing before the configuration is known.
///
/// The returned handle switches the filter to the configured level later.
fn init_tracing(verbose: bool) -> reload::Handle<EnvFilter, Registry> {
    let (subscriber, handle) = log_subscriber(verbose, io::stderr);
    subscriber.init();
    handle
}

fn log_subscriber<W>(
    verbose: bool,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync, reload::Handle<EnvFilter, Registry>)
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let level = if verbose { "debug" } else { "info" };
    let (filter, handle) = reload::Layer::new(EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, handle)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let log_filter = init_tracing(cli.verbose);

    let dir = config_dir();
    let mut config = Config::load_named(&dir, &cli.config)?;
    config.apply_env_overrides();
    cli.apply_to(&mut config);
    config.validate()?;

    if !cli.verbose {
        let level = config.log.level.to_lowercase();
        if let Err(e) = log_filter.reload(EnvFilter::new(&level)) {
            tracing::warn!("Could not apply log level {}: {}", level, e);
        }
    }

    let path = named_config_path(&dir, &cli.config);
    if let Err(e) = config.persisted().save(&path) {
        tracing::warn!("Could not save configuration {:?}: {:#}", path, e);
    }

    let mut router = build_router(&cli, &config)?;
    let output = router.route(cli.command.clone()).await?;
    print_output(&output);

    if router.is_interactive() {
        run_interactive(&mut router, cli.verbose).await;
    }
    Ok(())
}

/// Create the router for the configured connection.
fn build_router(cli: &Cli, config: &Config) -> anyhow::Result<CommandRouter<VirtualDevice, VirtualDevice>> {
    let connection = &config.connection;
    let device_address = connection.device_address()?;
    tracing::info!(
        kind = ?connection.kind,
        gateway = %connection.gateway,
        port = connection.port,
        gateway_address = %connection.gateway_address()?,
        source_address = %connection.source_address()?,
        device = %device_address,
        "Connection configured"
    );

    let device = match connection.kind {
        ConnectionKind::Virtual => VirtualDevice::new(),
        kind => {
            let cause = ProtocolError::ConnectionClosed(format!(
                "no KNXnet/IP backend linked for {kind:?} connections"
            ));
            return Err(SessionError::Connectivity(cause))
                .with_context(|| format!("Cannot reach device {device_address}"));
        }
    };

    let session = TransferSession::new(device.clone(), device, cli.session_options(config))
        .with_observer(ConsoleObserver::new(cli.verbose));
    Ok(CommandRouter::new(session, ConsolePrompt::new()))
}

/// Read commands from stdin until `close` or end of input.
async fn run_interactive<B, D>(router: &mut CommandRouter<B, D>, verbose: bool)
where
    B: BusConnection,
    D: DeviceSession + FileTransferService,
{
    let stdin = io::stdin();
    while router.is_interactive() {
        console::info("Enter a command:");
        let mut line = String::new();
        // Blocking read; prompts of the session read stdin the same way
        let read = stdin.lock().read_line(&mut line);
        if matches!(read, Ok(0) | Err(_)) {
            if let Err(e) = router.route(Command::Close).await {
                report_error(&e, verbose);
            }
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                let _ = e.print();
                continue;
            }
        };
        match router.route(command).await {
            Ok(output) => print_output(&output),
            Err(e) => report_error(&e, verbose),
        }
    }
}

fn print_output(output: &CommandOutput) {
    match output {
        CommandOutput::Done(message) => console::info(message),
        CommandOutput::Exists { path, exists } => {
            let state = if *exists { "exists" } else { "does not exist" };
            console::info(&format!("{path} {state}"));
        }
        CommandOutput::Listing { root, entries } => {
            console::info(&format!("Contents of {root}"));
            for entry in entries {
                println!("        {}", listing_line(root, entry));
            }
        }
        CommandOutput::Transferred(report) => {
            console::info(&format!(
                "{} of {} bytes sent",
                report.bytes_sent, report.transferred_size
            ));
        }
        CommandOutput::Downloaded { local, bytes } => {
            console::info(&format!("{bytes} bytes written to {}", local.display()));
        }
        CommandOutput::Info(info) => {
            console::detail(&format!("Version remote:  {}", info.remote_version));
            match &info.identity {
                Some(identity) => console::detail(&format!("Application:     {identity}")),
                None => console::warn("Application version unavailable"),
            }
            console::detail(&format!("Package size:    {}", info.package_size));
        }
        CommandOutput::Help => {
            if let Err(e) = Cli::command().print_help() {
                console::error(&e.to_string());
            }
        }
        CommandOutput::Version(version) => println!("knxftp {version}"),
    }
}

/// Print an error; the causes only in verbose mode.
fn report_error(error: &(dyn StdError + 'static), verbose: bool) {
    console::error(&error.to_string());
    if verbose {
        let mut source = error.source();
        while let Some(cause) = source {
            console::detail(&format!("  caused by: {cause}"));
            source = cause.source();
        }
    }
}

/// Exit code for a failed run.
fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<RouterError>() {
        return e.exit_code();
    }
    if let Some(e) = error.downcast_ref::<SessionError>() {
        return e.exit_code();
    }
    if let Some(e) = error.downcast_ref::<ProtocolError>() {
        return e.remote_code().unwrap_or(EXIT_FAILURE);
    }
    EXIT_FAILURE
}
