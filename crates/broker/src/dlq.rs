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

//! Dead-Letter Queue (spec §4.5, C5): durable, append-only hold for
//! messages that exhausted retries or were rejected by an open breaker.
//! Never blocks the delivery path — a full-disk or write failure logs and
//! drops (spec: "recorded in metrics").

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_subject: String,
    pub payload: Vec<u8>,
    pub first_attempt_at: DateTime<Utc>,
    pub last_error: String,
    pub attempt_count: u32,
}

pub struct DeadLetterQueue {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    persist_path: Option<PathBuf>,
}

impl DeadLetterQueue {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            persist_path,
        }
    }

    /// Enqueues a record. Appends to the durable file if one is configured;
    /// a write failure is logged and the record is still kept in memory for
    /// this process's lifetime (spec: DLQ must never block the delivery
    /// path on a durability failure).
    pub async fn enqueue(&self, record: DeadLetterRecord) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = append_to_file(path, &record).await {
                tracing::error!(error = %e, subject = %record.original_subject, "failed to persist dead letter, keeping in memory only");
            }
        }
        self.records.lock().await.push_back(record);
    }

    /// Drains up to `max` records to `handler`, removing each one the
    /// handler accepts. Records the handler rejects are pushed back to the
    /// front in original order.
    pub async fn drain<F>(&self, mut handler: F, max: usize) -> usize
    where
        F: FnMut(&DeadLetterRecord) -> bool,
    {
        let mut guard = self.records.lock().await;
        let mut drained = 0usize;
        let mut requeue = VecDeque::new();
        for _ in 0..max.min(guard.len()) {
            if let Some(record) = guard.pop_front() {
                if handler(&record) {
                    drained += 1;
                } else {
                    requeue.push_back(record);
                }
            }
        }
        while let Some(record) = requeue.pop_back() {
            guard.push_front(record);
        }
        drained
    }

    pub async fn size(&self) -> usize {
        self.records.lock().await.len()
    }
}

async fn append_to_file(path: &std::path::Path, record: &DeadLetterRecord) -> std::io::Result<()> {
    let line = serde_json::to_string(record).unwrap_or_default();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: &str) -> DeadLetterRecord {
        DeadLetterRecord {
            original_subject: subject.to_string(),
            payload: b"hello".to_vec(),
            first_attempt_at: Utc::now(),
            last_error: "boom".to_string(),
            attempt_count: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_and_size() {
        let dlq = DeadLetterQueue::new(None);
        dlq.enqueue(record("chat.say.arkham.001")).await;
        assert_eq!(dlq.size().await, 1);
    }

    #[tokio::test]
    async fn drain_removes_accepted_records_only() {
        let dlq = DeadLetterQueue::new(None);
        dlq.enqueue(record("a")).await;
        dlq.enqueue(record("b")).await;
        let drained = dlq.drain(|r| r.original_subject == "a", 10).await;
        assert_eq!(drained, 1);
        assert_eq!(dlq.size().await, 1);
    }

    #[tokio::test]
    async fn persists_to_disk_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        let dlq = DeadLetterQueue::new(Some(path.clone()));
        dlq.enqueue(record("chat.say.arkham.001")).await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("chat.say.arkham.001"));
    }
}
