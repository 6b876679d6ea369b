//! Polling side of the pipeline.
//!
//! - [`events`]: quotes, price events and the fan-in channel
//! - [`poller`]: one task per exchange
//! - [`supervisor`]: poller lifecycle

pub mod events;
pub mod poller;
pub mod supervisor;

pub use events::{event_channel, ErrorKind, EventReceiver, EventSender, PriceEvent, Quote, SessionId};
pub use poller::{CycleSummary, JoinOutcome, Poller, PollerHandle, PollerSettings, PollerState};
pub use supervisor::{Supervisor, SupervisorSettings};
