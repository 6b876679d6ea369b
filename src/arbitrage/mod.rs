//! Cross-exchange spread computation.
//!
//! This module handles:
//! - Directional spread percentages between two exchanges
//! - Ordering of spread tables
//! - Spread reporting for the periodic display

pub mod calculator;
pub mod detector;

pub use calculator::{
    compute_spreads, percentage_spread, sort_spreads, SortDirection, SpreadColumn, SpreadOrder,
    SpreadRow,
};
pub use detector::{log_spread_table, widest_spread, SpreadCell};
