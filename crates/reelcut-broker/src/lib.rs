#![forbid(unsafe_code)]

//! Minimal FIFO message broker contract, plus an in-memory reference
//! implementation with at-least-once delivery and per-message visibility
//! timeout. Any FIFO broker with this visibility semantics can sit behind
//! the trait.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reelcut_core::JobId;
use tokio::sync::Notify;

/// A receipt handle for a delivered message; required to `ack`/`nack` it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptHandle(u64);

/// A start message enqueued by `JobService::Create` or
/// re-enqueued by the Scheduler.
#[derive(Debug, Clone, Copy)]
pub struct StartMessage {
    pub job_id: JobId,
}

/// FIFO queue with at-least-once delivery and a per-message visibility
/// timeout. `receive` hides a message from other consumers until
/// `visibility_timeout` elapses or the receiver acks/nacks it.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, message: StartMessage);

    /// Pulls at most one message, becoming invisible to other receivers for
    /// `visibility_timeout`. Returns `None` if the queue is empty.
    async fn receive(&self, visibility_timeout: Duration) -> Option<(StartMessage, ReceiptHandle)>;

    /// Permanently removes the message. Workers ack on success or fatal
    /// failure.
    async fn ack(&self, receipt: ReceiptHandle);

    /// Returns the message to the queue after `delay`, for exponential
    /// backoff on retry.
    async fn nack(&self, receipt: ReceiptHandle, delay: Duration);
}

struct InFlightEntry {
    message: StartMessage,
    visible_at: DateTime<Utc>,
}

struct State {
    ready: VecDeque<StartMessage>,
    in_flight: std::collections::HashMap<u64, InFlightEntry>,
    next_receipt: u64,
}

/// In-memory reference broker. A background sweep, driven by callers
/// polling `receive` rather than a dedicated timer task, returns expired
/// in-flight messages to the ready queue, which is how an un-ACKed message
/// becomes redeliverable after its visibility timeout: the mechanism the
/// Scheduler's abandoned-job detector relies on at the `Job` layer,
/// mirrored here at the message layer.
pub struct InMemoryBroker {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                in_flight: std::collections::HashMap::new(),
                next_receipt: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn reclaim_expired(state: &mut State) {
        let now = Utc::now();
        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(entry) = state.in_flight.remove(&id) {
                state.ready.push_back(entry.message);
            }
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, message: StartMessage) {
        self.state.lock().ready.push_back(message);
        self.notify.notify_waiters();
    }

    async fn receive(&self, visibility_timeout: Duration) -> Option<(StartMessage, ReceiptHandle)> {
        let mut state = self.state.lock();
        Self::reclaim_expired(&mut state);
        let message = state.ready.pop_front()?;

        let receipt_id = state.next_receipt;
        state.next_receipt += 1;
        let visible_at = Utc::now()
            + chrono::Duration::from_std(visibility_timeout).unwrap_or(chrono::Duration::zero());
        state.in_flight.insert(receipt_id, InFlightEntry { message, visible_at });

        Some((message, ReceiptHandle(receipt_id)))
    }

    async fn ack(&self, receipt: ReceiptHandle) {
        self.state.lock().in_flight.remove(&receipt.0);
    }

    async fn nack(&self, receipt: ReceiptHandle, delay: Duration) {
        let mut state = self.state.lock();
        if let Some(entry) = state.in_flight.remove(&receipt.0) {
            if delay.is_zero() {
                state.ready.push_back(entry.message);
            } else {
                let visible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                state.in_flight.insert(receipt.0, InFlightEntry { message: entry.message, visible_at });
            }
        } else {
            tracing::debug!(receipt = receipt.0, "nack for unknown or already-resolved receipt");
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_is_fifo() {
        let broker = InMemoryBroker::new();
        let a = JobId::new();
        let b = JobId::new();
        broker.send(StartMessage { job_id: a }).await;
        broker.send(StartMessage { job_id: b }).await;

        let (first, _) = broker.receive(Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.job_id, a);
        let (second, _) = broker.receive(Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.job_id, b);
    }

    #[tokio::test]
    async fn unacked_message_is_invisible_until_timeout_expiry() {
        let broker = InMemoryBroker::new();
        let id = JobId::new();
        broker.send(StartMessage { job_id: id }).await;

        let (_, receipt) = broker.receive(Duration::from_millis(20)).await.unwrap();
        assert!(broker.receive(Duration::from_secs(60)).await.is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let redelivered = broker.receive(Duration::from_secs(60)).await;
        assert!(redelivered.is_some());
        let _ = receipt;
    }

    #[tokio::test]
    async fn ack_removes_message_permanently() {
        let broker = InMemoryBroker::new();
        let id = JobId::new();
        broker.send(StartMessage { job_id: id }).await;

        let (_, receipt) = broker.receive(Duration::from_millis(10)).await.unwrap();
        broker.ack(receipt).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(broker.receive(Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn nack_with_delay_defers_redelivery() {
        let broker = InMemoryBroker::new();
        let id = JobId::new();
        broker.send(StartMessage { job_id: id }).await;

        let (_, receipt) = broker.receive(Duration::from_secs(60)).await.unwrap();
        broker.nack(receipt, Duration::from_millis(30)).await;

        assert!(broker.receive(Duration::from_secs(60)).await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.receive(Duration::from_secs(60)).await.is_some());
    }
}
