use std::fmt;

use serde::{Deserialize, Serialize};

/// A network emulation profile, as applied to a single host interface.
///
/// Field names follow the camelCase layout of the persisted status file and of the
/// `throttlerProfiles` settings entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottlerConfig {
    /// Added latency, in milliseconds.
    pub latency: u64,
    /// Random delay variation, in milliseconds. The sign is not restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<i64>,
    /// Bandwidth cap in Kbit/s. Zero disables the cap.
    pub bandwidth: u64,
    /// Packet loss rate in percent.
    pub packet_loss: f64,
    /// Packet duplication rate in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_duplication: Option<f64>,
    /// Packet corruption rate in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_corruption: Option<f64>,
    /// The name of the network interface the profile is applied to.
    pub net_interface: String,
}

impl ThrottlerConfig {
    /// Creates a profile with no impairments on the given interface.
    pub fn new(net_interface: impl Into<String>) -> Self {
        Self {
            latency: 0,
            jitter: None,
            bandwidth: 0,
            packet_loss: 0.0,
            packet_duplication: None,
            packet_corruption: None,
            net_interface: net_interface.into(),
        }
    }

    /// Set the latency in milliseconds.
    pub fn latency(mut self, latency: u64) -> Self {
        self.latency = latency;
        self
    }

    /// Set the jitter in milliseconds.
    pub fn jitter(mut self, jitter: i64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Set the bandwidth cap in Kbit/s.
    pub fn bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Set the packet loss rate in percent.
    pub fn packet_loss(mut self, percent: f64) -> Self {
        self.packet_loss = percent;
        self
    }

    /// Set the packet duplication rate in percent.
    pub fn packet_duplication(mut self, percent: f64) -> Self {
        self.packet_duplication = Some(percent);
        self
    }

    /// Set the packet corruption rate in percent.
    pub fn packet_corruption(mut self, percent: f64) -> Self {
        self.packet_corruption = Some(percent);
        self
    }

    /// Returns the bandwidth cap, or `None` when the link is uncapped.
    pub fn bandwidth_cap(&self) -> Option<u64> {
        (self.bandwidth > 0).then_some(self.bandwidth)
    }
}

impl fmt::Display for ThrottlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: latency={}ms bandwidth={}Kbit/s loss={}%",
            self.net_interface, self.latency, self.bandwidth, self.packet_loss
        )?;
        if let Some(jitter) = self.jitter {
            write!(f, " jitter={jitter}ms")?;
        }
        if let Some(duplication) = self.packet_duplication {
            write!(f, " duplication={duplication}%")?;
        }
        if let Some(corruption) = self.packet_corruption {
            write!(f, " corruption={corruption}%")?;
        }
        Ok(())
    }
}
