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

//! Rate Limiter (spec §4.11, C11): sliding-window per-player, per-channel
//! quotas, evaluated at publish time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use mudcore_common::ids::{ChannelId, PlayerId};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_events: u32,
    pub burst: u32,
}

#[derive(Debug, Eq, PartialEq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

struct Window {
    timestamps: VecDeque<Instant>,
}

/// Keyed by `(player_id, channel_id)`. Each key's window is guarded by its
/// own mutex behind a concurrent map so unrelated players/channels never
/// contend (spec §5 per-key concurrency).
pub struct RateLimiter {
    windows: papaya::HashMap<(PlayerId, ChannelId), Arc<tokio::sync::Mutex<Window>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: papaya::HashMap::new(),
            config,
        }
    }

    pub async fn check(&self, player_id: &PlayerId, channel_id: &ChannelId) -> RateLimitDecision {
        let key = (player_id.clone(), channel_id.clone());
        let window_arc = {
            let guard = self.windows.guard();
            match self.windows.get(&key, &guard) {
                Some(w) => Arc::clone(w),
                None => {
                    let fresh = Arc::new(tokio::sync::Mutex::new(Window { timestamps: VecDeque::new() }));
                    match self.windows.try_insert(key.clone(), Arc::clone(&fresh), &guard) {
                        Ok(_) => fresh,
                        Err(e) => Arc::clone(e.current),
                    }
                }
            }
        };

        let mut window = window_arc.lock().await;
        let now = Instant::now();
        let cutoff = now - self.config.window;
        while let Some(front) = window.timestamps.front() {
            if *front < cutoff {
                window.timestamps.pop_front();
            } else {
                break;
            }
        }

        let limit = self.config.max_events + self.config.burst;
        if window.timestamps.len() as u32 >= limit {
            let retry_after = window
                .timestamps
                .front()
                .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
                .unwrap_or(self.config.window);
            return RateLimitDecision::Deny { retry_after };
        }

        window.timestamps.push_back(now);
        RateLimitDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(10),
            max_events: 2,
            burst: 0,
        });
        let player = PlayerId::new("alice");
        let channel = ChannelId::new("room");
        assert_eq!(limiter.check(&player, &channel).await, RateLimitDecision::Allow);
        assert_eq!(limiter.check(&player, &channel).await, RateLimitDecision::Allow);
        assert!(matches!(
            limiter.check(&player, &channel).await,
            RateLimitDecision::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn different_channels_have_independent_budgets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(10),
            max_events: 1,
            burst: 0,
        });
        let player = PlayerId::new("alice");
        assert_eq!(
            limiter.check(&player, &ChannelId::new("room")).await,
            RateLimitDecision::Allow
        );
        assert_eq!(
            limiter.check(&player, &ChannelId::new("global")).await,
            RateLimitDecision::Allow
        );
    }
}
