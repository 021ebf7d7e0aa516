//! macOS and FreeBSD backend.
//!
//! ## Implementation
//! Under the hood, this module builds a dummy network pipe with `dnctl` and routes the outgoing
//! traffic of the target interface through it with a `pfctl` anchor. Dummynet only knows about
//! bandwidth, delay and packet loss: jitter, duplication and corruption are ignored.

use std::process::Command;

use throttle_common::ThrottlerConfig;

use crate::{
    command::Runner,
    executor::{BackendError, ExecResult, Executor},
};

/// Pipe represents a dummynet pipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipe {
    /// The ID of the pipe.
    pub id: usize,
    /// Optional bandwidth cap in Kbps.
    pub bandwidth: Option<u64>,
    /// Optional propagation delay in ms.
    pub delay: Option<u64>,
    /// Optional packet loss rate, as a ratio between 0 and 1.
    pub plr: Option<f64>,
}

impl Pipe {
    /// Creates a new pipe with the given ID. The ID must be unique.
    pub fn new(id: usize) -> Self {
        Self { id, bandwidth: None, delay: None, plr: None }
    }

    /// Set the bandwidth cap of the pipe in Kbps.
    pub fn bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    /// Set the propagation delay of the pipe in ms.
    pub fn delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the packet loss rate of the pipe in percent.
    pub fn plr(mut self, percent: f64) -> Self {
        self.plr = Some(percent / 100.0);
        self
    }

    /// Creates a pipe with the impairments of `config` that dummynet supports.
    pub fn from_config(id: usize, config: &ThrottlerConfig) -> Self {
        let mut pipe = Self::new(id).delay(config.latency);

        if let Some(bandwidth) = config.bandwidth_cap() {
            pipe = pipe.bandwidth(bandwidth);
        }

        if config.packet_loss > 0.0 {
            pipe = pipe.plr(config.packet_loss);
        }

        pipe
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Builds the command to create the pipe.
    pub fn build(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("dnctl");
        cmd.arg("pipe").arg(self.id.to_string()).arg("config");

        if let Some(bandwidth) = self.bandwidth {
            let bw = format!("{}Kbit/s", bandwidth);

            cmd.args(["bw", &bw]);
        }

        if let Some(delay) = self.delay {
            cmd.args(["delay", &delay.to_string()]);
        }

        if let Some(plr) = self.plr {
            cmd.args(["plr", &plr.to_string()]);
        }

        cmd
    }

    /// Builds the command to destroy the pipe.
    pub fn destroy(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("dnctl");
        cmd.arg("pipe").arg("delete").arg(self.id.to_string());

        cmd
    }
}

/// A wrapper around the `pfctl` anchor the dummynet rules are loaded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// The name of the PF anchor to use.
    pub name: String,
}

impl Anchor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The ruleset sending everything leaving `interface` through the pipe `pipe_id`.
    pub fn rules(interface: &str, pipe_id: usize) -> String {
        format!("dummynet out on {interface} all pipe {pipe_id}\n")
    }

    /// Builds the command loading a ruleset into the anchor. The rules are read from stdin.
    pub fn load(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("pfctl");
        cmd.args(["-a", &self.name, "-f", "-"]);
        cmd
    }

    /// Builds the command removing every rule from the anchor.
    pub fn flush(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("pfctl");
        cmd.args(["-a", &self.name, "-F", "all"]);
        cmd
    }

    /// Builds the command enabling pf.
    pub fn enable(runner: &Runner) -> Command {
        let mut cmd = runner.command("pfctl");
        cmd.arg("-E");
        cmd
    }
}

/// The packet-filter backend.
#[derive(Debug, Clone)]
pub struct PacketFilter {
    runner: Runner,
    anchor: Anchor,
    pipe_id: usize,
}

impl PacketFilter {
    pub const NAME: &'static str = "dummynet";

    pub const DEFAULT_ANCHOR: &'static str = "throttle";
    pub const DEFAULT_PIPE_ID: usize = 1;

    pub fn new(runner: Runner) -> Self {
        Self { runner, anchor: Anchor::new(Self::DEFAULT_ANCHOR), pipe_id: Self::DEFAULT_PIPE_ID }
    }

    /// Set the pf anchor the rules are loaded into.
    pub fn anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Anchor::new(anchor);
        self
    }

    /// Set the dummynet pipe ID to use.
    pub fn pipe_id(mut self, id: usize) -> Self {
        self.pipe_id = id;
        self
    }

    fn warn_unsupported(config: &ThrottlerConfig) {
        if config.jitter.is_some_and(|j| j != 0) {
            tracing::warn!(jitter = ?config.jitter, "dummynet doesn't support jitter, ignoring");
        }
        if config.packet_duplication.is_some_and(|d| d > 0.0) {
            tracing::warn!(duplication = ?config.packet_duplication, "dummynet doesn't support packet duplication, ignoring");
        }
        if config.packet_corruption.is_some_and(|c| c > 0.0) {
            tracing::warn!(corruption = ?config.packet_corruption, "dummynet doesn't support packet corruption, ignoring");
        }
    }
}

impl Executor for PacketFilter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn start(&self, config: &ThrottlerConfig) -> ExecResult {
        Self::warn_unsupported(config);

        let pipe = Pipe::from_config(self.pipe_id, config);
        tracing::debug!(?pipe, anchor = %self.anchor.name, "configuring dummynet pipe");

        self.runner.run(pipe.build(&self.runner))?;

        let rules = Anchor::rules(&config.net_interface, self.pipe_id);
        if let Err(e) = self.runner.run_with_stdin(self.anchor.load(&self.runner), &rules) {
            // Don't leave a dangling pipe behind.
            if let Err(e) = self.runner.run(pipe.destroy(&self.runner)) {
                tracing::warn!(?e, pipe = pipe.id(), "failed to delete pipe after anchor error");
            }
            return Err(e.into());
        }

        self.runner.run(Anchor::enable(&self.runner))?;

        Ok(None)
    }

    fn stop(&self, config: &ThrottlerConfig) -> ExecResult {
        tracing::debug!(interface = %config.net_interface, anchor = %self.anchor.name, "removing dummynet rules");

        self.runner.run(self.anchor.flush(&self.runner))?;
        self.runner.run(Pipe::new(self.pipe_id).destroy(&self.runner))?;

        Ok(None)
    }

    fn check(&self) -> ExecResult {
        let listing = self.list()?.unwrap_or_default();

        match pipe_line(&listing, self.pipe_id) {
            Some(line) => Ok(Some(line.to_string())),
            None => Err(BackendError::Rejected(format!("dummynet pipe {} not configured", self.pipe_id))),
        }
    }

    fn list(&self) -> ExecResult {
        let mut cmd = self.runner.command("dnctl");
        cmd.args(["pipe", "show"]);

        let output = self.runner.run(cmd)?;
        Ok(Some(output.stdout))
    }

    fn exists(&self) -> ExecResult {
        let mut cmd = self.runner.command("dnctl");
        cmd.arg("list");

        self.runner.run(cmd)?;
        Ok(None)
    }
}

/// Finds the header line of pipe `id` in a `dnctl pipe show` listing, e.g.
/// `00001:  10.000 Kbit/s  100 ms burst 0`.
fn pipe_line(listing: &str, id: usize) -> Option<&str> {
    let prefix = format!("{id:05}:");
    listing.lines().find(|line| line.trim_start().starts_with(&prefix))
}
