//! Live delivery boundary.
//!
//! Delivery is a convenience on top of persistence: a push that finds no
//! connection is simply skipped, never queued or retried.

use async_trait::async_trait;

use casedesk_common::types::LivePayload;

/// Result of a best-effort push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to this many of the recipient's connections.
    Delivered(usize),
    /// The recipient has no live connection (or none accepted the payload).
    NoConnection,
}

/// Pushes payloads to a recipient's live connections.
///
/// Implementations must not block on slow consumers.
#[async_trait]
pub trait LiveDelivery: Send + Sync {
    async fn send(&self, recipient_id: i64, payload: LivePayload) -> DeliveryOutcome;
}
