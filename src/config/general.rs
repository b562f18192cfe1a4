//! General configuration settings for the fan-out core.

use serde_derive::{Deserialize, Serialize};

use super::{ByteSize, Duration};

/// General configuration: the listen address and the §6 tuning constants,
/// exposed as overridable knobs rather than hard compile-time constants so
/// a deployment can tune liveness/bundling without a rebuild. Logging is
/// a CLI/env concern (`Args::log_level`/`log_format`, §10), not a config
/// file concern — it must be resolved before the config file is even read,
/// so there is no `General` field for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct General {
    #[serde(default = "General::default_host")]
    pub host: String,

    #[serde(default = "General::default_port")]
    pub port: u16,

    /// Liveness knob (§6): how long an unfilled sequence number is
    /// tolerated before the server declares it dead and rolls it back.
    #[serde(default = "General::default_rollback_threshold")]
    pub rollback_threshold: Duration,

    /// Bundling threshold (§6): cumulative unbundled bytes since the last
    /// bundle hint before the next emission is tagged `buildBundle`.
    #[serde(default = "General::default_bundle_trigger")]
    pub bundle_trigger: ByteSize,

    /// Page size for C1 range-scan pagination during gap repair.
    #[serde(default = "General::default_scan_page_size")]
    pub scan_page_size: usize,
}

impl General {
    pub fn default_host() -> String {
        "0.0.0.0".into()
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub fn default_rollback_threshold() -> Duration {
        Duration::from_millis(10_000)
    }

    pub fn default_bundle_trigger() -> ByteSize {
        ByteSize::from_bytes(50 * 1024)
    }

    pub fn default_scan_page_size() -> usize {
        256
    }
}

impl Default for General {
    fn default() -> General {
        General {
            host: Self::default_host(),
            port: Self::default_port(),
            rollback_threshold: Self::default_rollback_threshold(),
            bundle_trigger: Self::default_bundle_trigger(),
            scan_page_size: Self::default_scan_page_size(),
        }
    }
}
