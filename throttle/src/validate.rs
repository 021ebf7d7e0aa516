//! Checks a [`ThrottlerConfig`] before anything is applied.
//!
//! Every rule is evaluated: a failed check doesn't stop the others, so the caller gets the full
//! list of problems in a single [`ValidationError`].

use std::{fmt, sync::Arc};

use serde_json::Value;
use throttle_common::ThrottlerConfig;
use throttle_exec::{InterfaceProbe, SystemInterfaces};

/// A single violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Latency,
    Jitter,
    Bandwidth,
    PacketLoss,
    PacketDuplication,
    PacketCorruption,
    /// The named interface doesn't exist on this host. Empty if no name was given.
    NetInterface(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latency => f.write_str("invalid latency (only non-negative integer)"),
            Self::Jitter => f.write_str("invalid jitter (only integer)"),
            Self::Bandwidth => f.write_str("invalid bandwidth (only non-negative integer)"),
            Self::PacketLoss => f.write_str("invalid packets loss (only non-negative number)"),
            Self::PacketDuplication => {
                f.write_str("invalid packets duplication (only non-negative number)")
            }
            Self::PacketCorruption => {
                f.write_str("invalid packets corruption (only non-negative number)")
            }
            Self::NetInterface(name) if name.is_empty() => f.write_str("missing network interface"),
            Self::NetInterface(name) => write!(f, "{name} is invalid network interface"),
        }
    }
}

/// All the rules a configuration violates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Configuration has following error(s):{}", list(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

impl ValidationError {
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

fn list(violations: &[Violation]) -> String {
    violations.iter().map(|v| format!(" {v};")).collect()
}

/// Validates throttler configurations against the rules and the host's interfaces.
#[derive(Debug, Clone)]
pub struct Validator {
    interfaces: Arc<dyn InterfaceProbe>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(SystemInterfaces)
    }
}

impl Validator {
    pub fn new(interfaces: impl InterfaceProbe + 'static) -> Self {
        Self { interfaces: Arc::new(interfaces) }
    }

    /// Validates a typed configuration. Integer fields are checked by their types already, what
    /// is left are the rates and the interface.
    pub fn validate(&self, config: &ThrottlerConfig) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if !is_rate(config.packet_loss) {
            violations.push(Violation::PacketLoss);
        }
        if config.packet_duplication.is_some_and(|d| !is_rate(d)) {
            violations.push(Violation::PacketDuplication);
        }
        if config.packet_corruption.is_some_and(|c| !is_rate(c)) {
            violations.push(Violation::PacketCorruption);
        }
        if !self.interfaces.is_valid(&config.net_interface) {
            violations.push(Violation::NetInterface(config.net_interface.clone()));
        }

        finish(violations)
    }

    /// Validates an untyped configuration, such as a settings profile or a JSON request, and
    /// returns the typed configuration if every rule holds.
    pub fn validate_value(&self, value: &Value) -> Result<ThrottlerConfig, ValidationError> {
        let mut violations = Vec::new();

        let latency = field(value, "latency").and_then(as_count);
        if latency.is_none() {
            violations.push(Violation::Latency);
        }

        let jitter = optional(value, "jitter", as_integer);
        if jitter.is_err() {
            violations.push(Violation::Jitter);
        }

        let bandwidth = field(value, "bandwidth").and_then(as_count);
        if bandwidth.is_none() {
            violations.push(Violation::Bandwidth);
        }

        let packet_loss = field(value, "packetLoss").and_then(Value::as_f64).filter(|l| is_rate(*l));
        if packet_loss.is_none() {
            violations.push(Violation::PacketLoss);
        }

        let packet_duplication = optional(value, "packetDuplication", as_rate);
        if packet_duplication.is_err() {
            violations.push(Violation::PacketDuplication);
        }

        let packet_corruption = optional(value, "packetCorruption", as_rate);
        if packet_corruption.is_err() {
            violations.push(Violation::PacketCorruption);
        }

        let net_interface = field(value, "netInterface").and_then(Value::as_str).unwrap_or_default();
        if !self.interfaces.is_valid(net_interface) {
            violations.push(Violation::NetInterface(net_interface.to_string()));
        }

        match (latency, jitter, bandwidth, packet_loss, packet_duplication, packet_corruption) {
            (
                Some(latency),
                Ok(jitter),
                Some(bandwidth),
                Some(packet_loss),
                Ok(packet_duplication),
                Ok(packet_corruption),
            ) if violations.is_empty() => Ok(ThrottlerConfig {
                latency,
                jitter,
                bandwidth,
                packet_loss,
                packet_duplication,
                packet_corruption,
                net_interface: net_interface.to_string(),
            }),
            _ => Err(ValidationError { violations }),
        }
    }
}

fn finish(violations: Vec<Violation>) -> Result<(), ValidationError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

fn is_rate(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// A whole number, written either as an integer or as a float without fractional part.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

/// A non-negative whole number, see [`as_integer`].
fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v < u64::MAX as f64)
            .map(|v| v as u64)
    })
}

fn as_rate(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| is_rate(*v))
}

/// Returns the field `name`, treating `null` as absent.
fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.get(name).filter(|v| !v.is_null())
}

/// Parses an optional field: absent is `Ok(None)`, present but unparsable is `Err(())`.
fn optional<T>(value: &Value, name: &str, parse: impl Fn(&Value) -> Option<T>) -> Result<Option<T>, ()> {
    field(value, name).map(|v| parse(v).ok_or(())).transpose()
}
