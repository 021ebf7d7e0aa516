use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use throttle::{
    Controller, ExecReport, ExecStatus, Platform, Response, Settings, ThrottlerConfig,
    ThrottlerHandle, ThrottlerService, Transition,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "throttlectl", version, about = "Apply and remove network conditions on this host")]
struct Cli {
    /// Settings file (JSON). Defaults apply if it doesn't exist.
    #[arg(short, long, env = "THROTTLE_SETTINGS", default_value = "./conf/settings.json")]
    config: PathBuf,

    /// Overrides the status file from the settings.
    #[arg(long, env = "THROTTLE_STATUS_FILE")]
    status_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply a configuration, replacing the current one.
    Start(StartArgs),
    /// Remove the applied configuration.
    Stop,
    /// Show the throttler status and the backend's rules.
    Status,
    /// List the profiles from the settings.
    Profiles,
    /// Check that the backend has rules installed.
    Check,
    /// List the backend's rules.
    List,
    /// Check that the backend tool is available.
    Exists,
}

#[derive(Debug, Args)]
struct StartArgs {
    /// Start a named profile from the settings.
    #[arg(
        long,
        conflicts_with_all = ["latency", "bandwidth", "packet_loss", "interface", "jitter", "duplication", "corruption"]
    )]
    profile: Option<String>,

    /// Added delay in milliseconds.
    #[arg(long, required_unless_present = "profile")]
    latency: Option<u64>,

    /// Bandwidth cap in kbit/s, 0 for none.
    #[arg(long, required_unless_present = "profile")]
    bandwidth: Option<u64>,

    /// Packet loss in percent.
    #[arg(long, required_unless_present = "profile")]
    packet_loss: Option<f64>,

    /// Network interface to throttle.
    #[arg(short, long, required_unless_present = "profile")]
    interface: Option<String>,

    /// Delay variation in milliseconds.
    #[arg(long, allow_negative_numbers = true)]
    jitter: Option<i64>,

    /// Packet duplication in percent.
    #[arg(long)]
    duplication: Option<f64>,

    /// Packet corruption in percent.
    #[arg(long)]
    corruption: Option<f64>,
}

impl StartArgs {
    fn config(&self) -> Option<ThrottlerConfig> {
        let mut config = ThrottlerConfig::new(self.interface.clone()?)
            .latency(self.latency?)
            .bandwidth(self.bandwidth?)
            .packet_loss(self.packet_loss?);

        if let Some(jitter) = self.jitter {
            config = config.jitter(jitter);
        }
        if let Some(duplication) = self.duplication {
            config = config.packet_duplication(duplication);
        }
        if let Some(corruption) = self.corruption {
            config = config.packet_corruption(corruption);
        }

        Some(config)
    }
}

fn print(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(%e, "failed to encode output"),
    }
}

fn failed(message: impl Into<String>) -> Response {
    Response { status: ExecStatus::Failed, message: message.into(), throttler_status: None }
}

fn respond(result: throttle::Result<Transition>) -> bool {
    let response = Response::from(result);
    print(&response);
    response.status == ExecStatus::Success
}

fn answer(result: throttle::Result<impl Serialize>) -> bool {
    match result {
        Ok(value) => {
            print(&value);
            true
        }
        Err(e) => {
            print(&failed(e.to_string()));
            false
        }
    }
}

fn report(result: throttle::Result<Option<String>>) -> bool {
    let report = match result {
        Ok(message) => ExecReport { status: ExecStatus::Success, message },
        Err(e) => ExecReport { status: ExecStatus::Failed, message: Some(e.to_string()) },
    };
    print(&report);
    report.status == ExecStatus::Success
}

/// Runs `command` and prints its result. Returns whether it succeeded.
async fn run(handle: &ThrottlerHandle, settings: &Settings, command: Command) -> bool {
    match command {
        Command::Start(StartArgs { profile: Some(name), .. }) => match settings.profile(&name) {
            Some(profile) => respond(handle.start_value(profile.clone()).await),
            None => {
                print(&failed(format!("no profile named {name}")));
                false
            }
        },
        Command::Start(args) => match args.config() {
            Some(config) => respond(handle.start(config).await),
            None => {
                print(&failed("incomplete configuration"));
                false
            }
        },
        Command::Stop => respond(handle.stop().await),
        Command::Status => answer(handle.status().await),
        Command::Profiles => answer(handle.profiles().await),
        Command::Check => report(handle.check().await),
        Command::List => report(handle.list().await),
        Command::Exists => report(handle.exists().await),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(%e, "failed to load settings");
            return ExitCode::FAILURE;
        }
    };
    if let Some(status_file) = cli.status_file {
        settings.status_file = status_file;
    }

    let platform = Platform::current();
    let controller = match Controller::from_settings(&settings, &platform) {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!(%e, %platform, "failed to create throttler");
            print(&failed(e.to_string()));
            return ExitCode::FAILURE;
        }
    };

    let (handle, thread) = ThrottlerService::spawn(controller);
    let ok = run(&handle, &settings, cli.command).await;

    drop(handle);
    if thread.join().is_err() {
        tracing::error!("throttler service panicked");
        return ExitCode::FAILURE;
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
