//! Linux backend, built on the `tc` utility from iproute2.
//!
//! A single netem qdisc is installed as the root qdisc of the target device. Netem covers every
//! impairment of a [`ThrottlerConfig`]: delay and jitter, loss, duplication, corruption and, with
//! its `rate` option, the bandwidth cap.

use std::process::Command;

use throttle_common::ThrottlerConfig;

use crate::{
    command::Runner,
    executor::{BackendError, ExecResult, Executor},
};

/// A root netem qdisc on a network device.
#[derive(Debug, Clone, PartialEq)]
pub struct NetemQdisc {
    /// The device to attach the qdisc to.
    pub device: String,
    /// Propagation delay in ms.
    pub delay: u64,
    /// Optional delay variation in ms, passed through as given.
    pub jitter: Option<i64>,
    /// Packet loss in percent.
    pub loss: f64,
    /// Optional packet duplication in percent.
    pub duplicate: Option<f64>,
    /// Optional packet corruption in percent.
    pub corrupt: Option<f64>,
    /// Optional rate cap in Kbit/s.
    pub rate: Option<u64>,
}

impl From<&ThrottlerConfig> for NetemQdisc {
    fn from(config: &ThrottlerConfig) -> Self {
        Self {
            device: config.net_interface.clone(),
            delay: config.latency,
            jitter: config.jitter.filter(|j| *j != 0),
            loss: config.packet_loss,
            duplicate: config.packet_duplication,
            corrupt: config.packet_corruption,
            rate: config.bandwidth_cap(),
        }
    }
}

impl NetemQdisc {
    /// Builds the command installing the qdisc. `replace` is used over `add` so a qdisc left
    /// behind by a crashed process doesn't block a fresh start.
    pub fn build(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("tc");
        cmd.args(["qdisc", "replace", "dev", &self.device, "root", "handle", "1:", "netem"]);

        cmd.args(["delay", &format!("{}ms", self.delay)]);
        if let Some(jitter) = self.jitter {
            cmd.arg(format!("{jitter}ms"));
        }

        cmd.args(["loss", &format!("{}%", self.loss)]);

        if let Some(duplicate) = self.duplicate {
            cmd.args(["duplicate", &format!("{duplicate}%")]);
        }

        if let Some(corrupt) = self.corrupt {
            cmd.args(["corrupt", &format!("{corrupt}%")]);
        }

        if let Some(rate) = self.rate {
            cmd.args(["rate", &format!("{rate}kbit")]);
        }

        cmd
    }

    /// Builds the command deleting the root qdisc of the device.
    pub fn destroy(&self, runner: &Runner) -> Command {
        let mut cmd = runner.command("tc");
        cmd.args(["qdisc", "del", "dev", &self.device, "root"]);
        cmd
    }
}

/// The traffic-control backend.
#[derive(Debug, Clone)]
pub struct TrafficControl {
    runner: Runner,
}

impl TrafficControl {
    pub const NAME: &'static str = "tc";

    pub fn new(runner: Runner) -> Self {
        Self { runner }
    }

    fn show(&self) -> Command {
        let mut cmd = self.runner.command("tc");
        cmd.args(["qdisc", "show"]);
        cmd
    }
}

impl Executor for TrafficControl {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn start(&self, config: &ThrottlerConfig) -> ExecResult {
        let qdisc = NetemQdisc::from(config);
        tracing::debug!(?qdisc, "installing netem qdisc");

        self.runner.run(qdisc.build(&self.runner))?;
        Ok(None)
    }

    fn stop(&self, config: &ThrottlerConfig) -> ExecResult {
        let qdisc = NetemQdisc::from(config);
        tracing::debug!(device = %qdisc.device, "removing netem qdisc");

        self.runner.run(qdisc.destroy(&self.runner))?;
        Ok(None)
    }

    fn check(&self) -> ExecResult {
        let listing = self.list()?.unwrap_or_default();
        let netem = netem_lines(&listing);

        if netem.is_empty() {
            return Err(BackendError::Rejected("no netem qdisc installed".to_string()));
        }

        Ok(Some(netem.join("\n")))
    }

    fn list(&self) -> ExecResult {
        let output = self.runner.run(self.show())?;
        Ok(Some(output.stdout))
    }

    fn exists(&self) -> ExecResult {
        let mut cmd = self.runner.command("tc");
        cmd.arg("-V");

        let output = self.runner.run(cmd)?;
        Ok(Some(output.stdout.trim().to_string()))
    }
}

/// Returns the lines of a `tc qdisc show` listing that describe a netem qdisc.
fn netem_lines(listing: &str) -> Vec<&str> {
    listing.lines().filter(|line| line.starts_with("qdisc netem")).collect()
}
