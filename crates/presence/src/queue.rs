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

//! Per-connection bounded outbound queue (spec §4.9, part of the Connection
//! entity in §3): single writer from senders, single reader from the
//! connection's own writer task (spec §5). Backed by a mutex-guarded
//! `VecDeque` rather than a channel so the drop-oldest policy for
//! non-critical events can be implemented directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use mudcore_common::error::DeliveryError;

pub struct OutboundQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues `bytes`. Non-critical events drop the oldest queued frame
    /// when full; critical events block up to `block_timeout` waiting for
    /// room, returning `DeliveryError::Timeout` on expiry (spec §4.9).
    pub async fn enqueue(
        &self,
        bytes: Vec<u8>,
        critical: bool,
        block_timeout: Duration,
    ) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Timeout);
        }
        if !critical {
            let mut guard = self.inner.lock().await;
            if guard.len() >= self.capacity {
                guard.pop_front();
            }
            guard.push_back(bytes);
            self.notify.notify_one();
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + block_timeout;
        loop {
            {
                let mut guard = self.inner.lock().await;
                if guard.len() < self.capacity {
                    guard.push_back(bytes);
                    self.notify.notify_one();
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeliveryError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits for and pops the next frame. Returns `None` once the queue is
    /// closed and drained.
    pub async fn dequeue(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(item) = guard.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether the transport behind this queue has reported closed. Used
    /// by the Cleaner (spec §4.16 "dead transports").
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_oldest_keeps_size_at_capacity() {
        let q = OutboundQueue::new(2);
        q.enqueue(vec![1], false, Duration::from_millis(10)).await.unwrap();
        q.enqueue(vec![2], false, Duration::from_millis(10)).await.unwrap();
        q.enqueue(vec![3], false, Duration::from_millis(10)).await.unwrap();
        assert_eq!(q.len().await, 2);
        assert_eq!(q.dequeue().await, Some(vec![2]));
        assert_eq!(q.dequeue().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn critical_blocks_then_times_out_when_full() {
        let q = OutboundQueue::new(1);
        q.enqueue(vec![1], true, Duration::from_millis(10)).await.unwrap();
        let result = q.enqueue(vec![2], true, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(DeliveryError::Timeout)));
    }

    #[tokio::test]
    async fn close_unblocks_dequeue() {
        let q = OutboundQueue::new(4);
        q.close();
        assert_eq!(q.dequeue().await, None);
    }
}
