//! Configuration management with profile support.
//!
//! Provides centralized configuration for the shared-params defaults, the
//! selector's fan-out and window sizing, the reconciler's channel
//! capacities and look-back limit, and the tipset cache's on-disk
//! location. Supports different profiles (testing, production) the same
//! way the rest of this codebase's profile-config types do.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Global defaults applied to a message's `meta` fields whenever the
/// caller left them zero-valued, plus the selector's default pending
/// window and failure cap. Mirrors the `shared_params` row the source
/// system keeps in its relational store; here it is config, not a
/// database row, since persistence of mutable shared params is handled
/// by [`crate::SharedParamsRepo`] and this struct only supplies the
/// process-start defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedParamsConfig {
    /// Epoch after which an unfilled message is abandoned; 0 = never.
    #[serde(default = "default_expire_epoch")]
    pub expire_epoch: i64,

    /// Fractional over-estimation applied to gas results, e.g. 0.25 = +25%.
    #[serde(default = "default_gas_over_estimation")]
    pub gas_over_estimation: f64,

    /// Default ceiling on attonFIL fee per message, used when a message's
    /// own `meta.max_fee` is unset.
    #[serde(default = "default_max_fee")]
    pub max_fee: u128,

    #[serde(default = "default_max_fee_cap")]
    pub max_fee_cap: u128,

    /// Default pending window per address, when the address has no
    /// override in its wallet-router `select_msg_num`.
    #[serde(default = "default_sel_msg_num")]
    pub sel_msg_num: u64,

    /// Consecutive estimation failures tolerated before a selector cycle
    /// gives up on an address.
    #[serde(default = "default_max_est_fail_num_of_msg")]
    pub max_est_fail_num_of_msg: u64,

    /// Interval between unsolicited selector scans, for addresses that
    /// never receive a head-change trigger (e.g. a quiet chain).
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_expire_epoch() -> i64 {
    0
}
fn default_gas_over_estimation() -> f64 {
    0.25
}
fn default_max_fee() -> u128 {
    50_000_000_000_000_000 // 0.05 FIL
}
fn default_max_fee_cap() -> u128 {
    0
}
fn default_sel_msg_num() -> u64 {
    20
}
fn default_max_est_fail_num_of_msg() -> u64 {
    10
}
fn default_scan_interval_secs() -> u64 {
    120
}

impl Default for SharedParamsConfig {
    fn default() -> Self {
        Self {
            expire_epoch: default_expire_epoch(),
            gas_over_estimation: default_gas_over_estimation(),
            max_fee: default_max_fee(),
            max_fee_cap: default_max_fee_cap(),
            sel_msg_num: default_sel_msg_num(),
            max_est_fail_num_of_msg: default_max_est_fail_num_of_msg(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

/// Selector concurrency and pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    /// Maximum number of addresses processed concurrently per invocation.
    #[serde(default = "default_address_concurrency")]
    pub address_concurrency: usize,
}

fn default_address_concurrency() -> usize {
    10
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { address_concurrency: default_address_concurrency() }
    }
}

/// Head reconciler channel capacities and reconnect behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcilerConfig {
    #[serde(default = "default_head_change_capacity")]
    pub head_change_capacity: usize,

    #[serde(default = "default_trigger_capacity")]
    pub trigger_capacity: usize,

    /// Ancestor-walk hop limit before giving up and falling back to
    /// `UpdateAllFilledMessage`.
    #[serde(default = "default_look_back_limit")]
    pub look_back_limit: u64,
}

fn default_head_change_capacity() -> usize {
    5
}
fn default_trigger_capacity() -> usize {
    20
}
fn default_look_back_limit() -> u64 {
    900
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            head_change_capacity: default_head_change_capacity(),
            trigger_capacity: default_trigger_capacity(),
            look_back_limit: default_look_back_limit(),
        }
    }
}

/// Tipset cache bound and snapshot location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TipsetCacheConfig {
    #[serde(default = "default_max_tipset_count")]
    pub max_tipset_count: usize,

    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

fn default_max_tipset_count() -> usize {
    3000
}
fn default_snapshot_path() -> String {
    "tipset_cache.json".to_string()
}

impl Default for TipsetCacheConfig {
    fn default() -> Self {
        Self { max_tipset_count: default_max_tipset_count(), snapshot_path: default_snapshot_path() }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagerConfig {
    /// Profile name, for logging/identification.
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub shared_params: SharedParamsConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub tipset_cache: TipsetCacheConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for MessagerConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            shared_params: SharedParamsConfig::default(),
            selector: SelectorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            tipset_cache: TipsetCacheConfig::default(),
        }
    }
}

impl MessagerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Testing profile: short windows, tight look-back, frequent scans.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            shared_params: SharedParamsConfig {
                expire_epoch: 0,
                gas_over_estimation: 0.25,
                max_fee: 5_000_000_000_000_000,
                max_fee_cap: 0,
                sel_msg_num: 3,
                max_est_fail_num_of_msg: 3,
                scan_interval_secs: 10,
            },
            selector: SelectorConfig { address_concurrency: 4 },
            reconciler: ReconcilerConfig {
                head_change_capacity: 5,
                trigger_capacity: 20,
                look_back_limit: 50,
            },
            tipset_cache: TipsetCacheConfig {
                max_tipset_count: 200,
                snapshot_path: "tipset_cache.testing.json".to_string(),
            },
        }
    }

    /// Production profile: the conservative defaults this struct already
    /// carries, named explicitly so deployment config can select it.
    pub fn production() -> Self {
        Self { profile: "production".to_string(), ..Self::default() }
    }

    /// Select a profile from the `MESSAGER_PROFILE` environment variable.
    pub fn from_env() -> Self {
        let profile = std::env::var("MESSAGER_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "messager configuration loaded");
        tracing::info!(
            sel_msg_num = self.shared_params.sel_msg_num,
            max_est_fail_num_of_msg = self.shared_params.max_est_fail_num_of_msg,
            expire_epoch = self.shared_params.expire_epoch,
            "shared params defaults"
        );
        tracing::info!(
            address_concurrency = self.selector.address_concurrency,
            "selector configuration"
        );
        tracing::info!(
            head_change_capacity = self.reconciler.head_change_capacity,
            trigger_capacity = self.reconciler.trigger_capacity,
            look_back_limit = self.reconciler.look_back_limit,
            "reconciler configuration"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<MessagerConfig> = OnceLock::new();

pub fn init_config(config: MessagerConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static MessagerConfig {
    GLOBAL_CONFIG.get_or_init(MessagerConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = MessagerConfig::default();
        assert_eq!(config.shared_params.sel_msg_num, 20);
        assert_eq!(config.reconciler.look_back_limit, 900);
        assert_eq!(config.tipset_cache.max_tipset_count, 3000);
    }

    #[test]
    fn testing_profile_shrinks_windows() {
        let config = MessagerConfig::testing();
        assert_eq!(config.profile, "testing");
        assert!(config.shared_params.sel_msg_num < MessagerConfig::default().shared_params.sel_msg_num);
        assert!(config.reconciler.look_back_limit < 900);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = MessagerConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: MessagerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn from_env_defaults_without_profile_var() {
        std::env::remove_var("MESSAGER_PROFILE");
        let config = MessagerConfig::from_env();
        assert_eq!(config.profile, "default");
    }
}
