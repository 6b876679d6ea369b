//! Aggregated market state.
//!
//! - [`view`]: snapshot, movement classification, latency statistics
//! - [`aggregator`]: the single writer and its read handle

pub mod aggregator;
pub mod view;

pub use aggregator::{Aggregator, MarketHandle};
pub use view::{classify, LatencyStats, MarketView, Movement, Snapshot};
