// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Layered configuration via `figment`: bundled defaults, an optional YAML
//! file, then environment variables override on top. The teacher declares
//! `figment` as a workspace dependency for this purpose; its own binaries
//! currently only exercise clap + a JSON file merge, so this is the fuller
//! use of that dependency the workspace has always carried.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub tls_enabled: bool,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
    pub enable_subject_validation: bool,
    pub strict_subject_validation: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:7447".to_string(),
            tls_enabled: false,
            health_interval_ms: 30_000,
            health_timeout_ms: 5_000,
            enable_subject_validation: true,
            strict_subject_validation: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_ratio: 0.2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub probe_success_to_close: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            probe_success_to_close: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub outbound_queue_size: usize,
    pub grace_period_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_size: 256,
            grace_period_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub stale_strikes: u32,
    pub token_revalidation_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 15_000,
            pong_timeout_ms: 5_000,
            stale_strikes: 3,
            token_revalidation_interval_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanerConfig {
    pub interval_ms: u64,
    /// Max DLQ records replayed through the broker per sweep (spec §4.16
    /// "optional periodic replay of DLQ entries through the normal path").
    pub dlq_replay_batch: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000, dlq_replay_batch: 32 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_events: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            max_events: 20,
            burst: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MuteCacheConfig {
    pub ttl_ms: u64,
}

impl Default for MuteCacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 5 * 60_000 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub fanout_concurrency: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { fanout_concurrency: 64 }
    }
}

/// Full enumerated config surface from spec §6.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub broker: BrokerConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub connection: ConnectionConfig,
    pub health: HealthConfig,
    pub cleaner: CleanerConfig,
    pub rate_limit: RateLimitConfig,
    pub mute_cache: MuteCacheConfig,
    pub broadcast: BroadcastConfig,
}

impl CoreConfig {
    /// Layers a bundled default, an optional YAML file at `path` (if it
    /// exists), then `MUDCORE_`-prefixed environment variables on top.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));
        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            }
        }
        figment = figment.merge(Env::prefixed("MUDCORE_").split("__"));
        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = CoreConfig::load(None).expect("default config loads");
        assert_eq!(cfg.broker.health_interval_ms, 30_000);
        assert_eq!(cfg.rate_limit.max_events, 20);
    }
}
