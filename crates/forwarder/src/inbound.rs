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

//! Per-subscription inbound buffer (spec §4.15 backpressure): the broker
//! client invokes subscription handlers synchronously, so unlike the
//! outbound queue (`mudcore_presence::queue::OutboundQueue`) this buffer is
//! pushed to from sync code and drained by its own async worker task.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// Critical (combat) frames get a short bounded spin inside the sync
/// handler rather than being dropped immediately; this briefly blocks the
/// broker subscription's own task, never the scheduler at large (spec
/// §4.15: "prefer blocking the broker handler briefly over dropping").
const CRITICAL_PUSH_SPIN: Duration = Duration::from_millis(25);

/// One inbound broker frame: the concrete topic it was published on
/// (never the subscribe-side pattern) paired with its payload. Recipient
/// resolution (`subject_scope::classify`) needs the concrete topic, since
/// a subscription pattern like `"chat.say.>"` carries no room id of its
/// own.
type InboundFrame = (String, Vec<u8>);

pub struct InboundBuffer {
    inner: Mutex<VecDeque<InboundFrame>>,
    capacity: usize,
    notify: Notify,
}

impl InboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), capacity, notify: Notify::new() }
    }

    /// Non-blocking push used by non-critical subjects: drops the oldest
    /// queued frame on overflow and returns whether a drop occurred.
    pub fn push(&self, topic: String, bytes: Vec<u8>) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let dropped = if guard.len() >= self.capacity {
            guard.pop_front();
            true
        } else {
            false
        };
        guard.push_back((topic, bytes));
        drop(guard);
        self.notify.notify_one();
        dropped
    }

    /// Push used for critical subjects (e.g. `combat.*`): spins briefly for
    /// room before falling back to drop-oldest.
    pub fn push_critical(&self, topic: String, bytes: Vec<u8>) -> bool {
        let deadline = std::time::Instant::now() + CRITICAL_PUSH_SPIN;
        loop {
            {
                let mut guard = self.inner.lock().unwrap();
                if guard.len() < self.capacity {
                    guard.push_back((topic.clone(), bytes.clone()));
                    drop(guard);
                    self.notify.notify_one();
                    return false;
                }
            }
            if std::time::Instant::now() >= deadline {
                return self.push(topic, bytes);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub async fn pop(&self) -> InboundFrame {
        loop {
            {
                let mut guard = self.inner.lock().unwrap();
                if let Some(item) = guard.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_drops_oldest_when_full() {
        let buf = InboundBuffer::new(2);
        assert!(!buf.push("t".into(), vec![1]));
        assert!(!buf.push("t".into(), vec![2]));
        assert!(buf.push("t".into(), vec![3]));
        assert_eq!(buf.len(), 2);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let buf = std::sync::Arc::new(InboundBuffer::new(4));
        let buf2 = std::sync::Arc::clone(&buf);
        let handle = tokio::spawn(async move { buf2.pop().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        buf.push("chat.say.arkham.001".into(), vec![9]);
        assert_eq!(handle.await.unwrap(), ("chat.say.arkham.001".to_string(), vec![9]));
    }
}
