//! Casedesk notification API.
//!
//! Endpoints:
//! - GET   /health
//! - POST  /api/notifications/events: Emit a domain event as the caller
//! - GET   /api/notifications: The caller's feed
//! - GET   /api/notifications/unread-count
//! - PATCH /api/notifications/{id}/read
//! - POST  /api/notifications/read-all
//! - GET   /api/notifications/stream: Live notifications (SSE)

pub mod middleware;
pub mod routes;
pub mod state;
