pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod status;

pub use errors::RelayError;
pub use events::{ClientEvent, HubEvent, LogLevel};
pub use ids::{ObserverId, RunId};
pub use messages::{Evaluation, Kind, Message, SealedPayload};
pub use status::{ConnectionStatus, PartyId, PartyState};
