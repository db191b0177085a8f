//! In-process message queue.
//!
//! Mirrors the lease, redelivery, and dead-letter behavior of the Redis
//! queue without any external service.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use super::{parse_handle, Leased, MessageQueue, QueueConfig, QueueError, ReceiptHandle};

/// A stored message.
#[derive(Debug)]
struct Entry<T> {
    payload: T,
    receives: u32,
    lease_until: Option<Instant>,
}

/// Mutable queue state.
#[derive(Debug)]
struct State<T> {
    next_id: u64,
    ready: VecDeque<u64>,
    entries: HashMap<u64, Entry<T>>,
    dead: Vec<T>,
}

impl<T> State<T> {
    /// Returns expired leases to the ready list or the dead-letter list.
    fn reclaim_expired(&mut self, now: Instant, max_receive_count: u32) {
        let mut expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.lease_until.is_some_and(|until| until <= now))
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        for id in expired {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.lease_until = None;

            if entry.receives >= max_receive_count {
                if let Some(entry) = self.entries.remove(&id) {
                    warn!(message_id = id, receives = entry.receives, "Message moved to dead-letter list");
                    self.dead.push(entry.payload);
                }
            } else {
                self.ready.push_back(id);
            }
        }
    }
}

/// In-process queue with lease-based delivery.
#[derive(Debug)]
pub struct InMemoryQueue<T> {
    config: QueueConfig,
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T: Clone + Send + Sync> InMemoryQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                next_id: 1,
                ready: VecDeque::new(),
                entries: HashMap::new(),
                dead: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the number of messages not yet deleted or dead-lettered.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Returns true if no messages are pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the number of dead-lettered messages.
    pub async fn dead_letter_len(&self) -> usize {
        self.state.lock().await.dead.len()
    }

    /// Returns copies of the dead-lettered payloads.
    pub async fn dead_letters(&self) -> Vec<T> {
        self.state.lock().await.dead.clone()
    }

    fn lease_ready(&self, state: &mut State<T>, max_messages: usize) -> Vec<Leased<T>> {
        let now = Instant::now();
        state.reclaim_expired(now, self.config.max_receive_count);

        let mut leased = Vec::new();
        while leased.len() < max_messages {
            let Some(id) = state.ready.pop_front() else {
                break;
            };
            let Some(entry) = state.entries.get_mut(&id) else {
                continue;
            };
            entry.receives = entry.receives.saturating_add(1);
            entry.lease_until = Some(now + self.config.visibility_timeout);
            leased.push(Leased {
                payload: entry.payload.clone(),
                handle: ReceiptHandle(id.to_string()),
                receive_count: entry.receives,
            });
        }
        leased
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> MessageQueue<T> for InMemoryQueue<T> {
    async fn send(&self, payload: &T) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(
                id,
                Entry {
                    payload: payload.clone(),
                    receives: 0,
                    lease_until: None,
                },
            );
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<Leased<T>>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let leased = {
            let mut state = self.state.lock().await;
            self.lease_ready(&mut state, max_messages)
        };
        if !leased.is_empty() || self.config.receive_wait.is_zero() {
            return Ok(leased);
        }

        let _ = tokio::time::timeout(self.config.receive_wait, self.notify.notified()).await;

        let mut state = self.state.lock().await;
        Ok(self.lease_ready(&mut state, max_messages))
    }

    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError> {
        let id = parse_handle(handle)?;
        let mut state = self.state.lock().await;
        state.entries.remove(&id);
        state.ready.retain(|ready| *ready != id);
        Ok(())
    }
}
