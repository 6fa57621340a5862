//! Notification dedup-and-fanout engine.
//!
//! A domain event flows through the [`resolver`] (who should hear about it),
//! the [`guard`] (has this recipient already heard about it recently), the
//! [`store`] (durable record) and finally [`delivery`] (best-effort push to
//! live connections). [`fanout::FanoutOrchestrator`] wires these together.

pub mod delivery;
pub mod directory;
pub mod error;
pub mod event;
pub mod fanout;
pub mod feed;
pub mod guard;
pub mod resolver;
pub mod store;

pub use fanout::{
    EngineConfig, FanoutOrchestrator, FanoutReport, RecipientOutcome, RecipientReport,
};
