//! Observer side of the relay: one WebSocket stream, many independent
//! subscribers.

pub mod client;
pub mod error;
pub mod panels;
pub mod subscribers;

pub use client::ObserverClient;
pub use error::ClientError;
pub use panels::{PartyLogPanel, ProcessingPanel, TrailingLog, DEFAULT_TRAILING};
pub use subscribers::{DispatchSummary, Subscribers, Subscription};
