//! Spread reporting for the periodic display.

use std::fmt;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use crate::market::ExchangeId;

use super::calculator::SpreadRow;

/// Row with the largest spread in either direction.
pub fn widest_spread(rows: &[SpreadRow]) -> Option<(&SpreadRow, Decimal)> {
    rows.iter()
        .filter_map(|row| {
            let widest = match (row.spread_a_to_b, row.spread_b_to_a) {
                (Some(x), Some(y)) => x.max(y),
                (Some(x), None) | (None, Some(x)) => x,
                (None, None) => return None,
            };
            Some((row, widest))
        })
        .max_by(|(_, x), (_, y)| x.cmp(y))
}

/// Log the top `limit` rows of an already ordered spread table.
#[instrument(skip(rows), fields(a = %a, b = %b, rows = rows.len()))]
pub fn log_spread_table(a: &ExchangeId, b: &ExchangeId, rows: &[SpreadRow], limit: usize) {
    if rows.is_empty() {
        debug!("No comparable assets yet");
        return;
    }

    for row in rows.iter().take(limit) {
        info!(
            asset = %row.asset,
            a_bid = %row.a_bid,
            a_ask = %row.a_ask,
            b_bid = %row.b_bid,
            b_ask = %row.b_ask,
            a_to_b = %SpreadCell(row.spread_a_to_b),
            b_to_a = %SpreadCell(row.spread_b_to_a),
            "Spread"
        );
    }

    if let Some((row, widest)) = widest_spread(rows) {
        info!(asset = %row.asset, spread_pct = %widest.round_dp(4), "Widest spread");
    }
}

/// Formats an optional percentage, `-` when absent.
pub struct SpreadCell(pub Option<Decimal>);

impl fmt::Display for SpreadCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{:.4}%", value),
            None => f.write_str("-"),
        }
    }
}
