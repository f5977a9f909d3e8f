//! Controller configuration
//!
//! Options are a strongly typed structure populated once at startup.
//! Validation collects every violation before reporting so an operator
//! fixes one round of mistakes, not one mistake per restart.

use std::time::Duration;

use serde::Deserialize;
use trellis_core::ConfigError;

pub const DEFAULT_CYCLE_SECONDS: u64 = 60;
pub const DEFAULT_ROUTE_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_CREATE_CIRCUIT_RETRIES: u32 = 2;
pub const DEFAULT_PENDING_LINK_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_SMART_REROUTE_FRACTION: f32 = 0.02;
pub const DEFAULT_SMART_REROUTE_CAP: u32 = 4;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// Smart-reroute pacing
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmartOptions {
    /// Fraction of active circuits eligible for reroute per cycle. Valid
    /// range: (0, 1].
    pub reroute_fraction: f32,
    /// Hard per-cycle reroute ceiling. Must be at least 1.
    pub reroute_cap: u32,
}

impl Default for SmartOptions {
    fn default() -> Self {
        Self {
            reroute_fraction: DEFAULT_SMART_REROUTE_FRACTION,
            reroute_cap: DEFAULT_SMART_REROUTE_CAP,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkOptions {
    /// Control-loop maintenance period in seconds. Must be positive.
    pub cycle_seconds: u64,
    /// Route-setup acknowledgement deadline in seconds. Must be positive.
    pub route_timeout_seconds: u64,
    /// Route-dispatch attempts per circuit creation. Must be at least 1.
    pub create_circuit_retries: u32,
    /// Seconds a proposed link may stay Pending before cleanup expires it.
    pub pending_link_timeout_seconds: u64,
    pub smart: SmartOptions,
    /// Capacity of the topology-change handoff queues. Must be at least 1.
    pub event_queue_capacity: usize,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            cycle_seconds: DEFAULT_CYCLE_SECONDS,
            route_timeout_seconds: DEFAULT_ROUTE_TIMEOUT_SECONDS,
            create_circuit_retries: DEFAULT_CREATE_CIRCUIT_RETRIES,
            pending_link_timeout_seconds: DEFAULT_PENDING_LINK_TIMEOUT_SECONDS,
            smart: SmartOptions::default(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl NetworkOptions {
    /// Check every field, reporting all violations together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.cycle_seconds == 0 {
            violations.push("cycleSeconds must be positive".to_string());
        }
        if self.route_timeout_seconds == 0 {
            violations.push("routeTimeoutSeconds must be positive".to_string());
        }
        if self.create_circuit_retries == 0 {
            violations.push("createCircuitRetries must be at least 1".to_string());
        }
        if !(self.smart.reroute_fraction > 0.0 && self.smart.reroute_fraction <= 1.0) {
            violations.push(format!(
                "smart.rerouteFraction must be in (0, 1], got {}",
                self.smart.reroute_fraction
            ));
        }
        if self.smart.reroute_cap == 0 {
            violations.push("smart.rerouteCap must be at least 1".to_string());
        }
        if self.event_queue_capacity == 0 {
            violations.push("eventQueueCapacity must be at least 1".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_seconds)
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_secs(self.route_timeout_seconds)
    }

    pub fn pending_link_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_link_timeout_seconds)
    }
}
