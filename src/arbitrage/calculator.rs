//! Directional spread calculations between two exchanges.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::market::{Asset, ExchangeId};
use crate::snapshot::Snapshot;

/// Spread between two exchanges for one asset.
///
/// All four input prices are present in every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadRow {
    /// Asset compared.
    pub asset: Asset,
    /// Symbol quoted on exchange A.
    pub a_symbol: Option<String>,
    /// Symbol quoted on exchange B.
    pub b_symbol: Option<String>,
    /// Best bid on A.
    pub a_bid: Decimal,
    /// Best ask on A.
    pub a_ask: Decimal,
    /// Best bid on B.
    pub b_bid: Decimal,
    /// Best ask on B.
    pub b_ask: Decimal,
    /// (B.ask - A.bid) / A.bid * 100; absent when A.bid <= 0.
    pub spread_a_to_b: Option<Decimal>,
    /// (A.ask - B.bid) / B.bid * 100; absent when B.bid <= 0.
    pub spread_b_to_a: Option<Decimal>,
}

/// Column to order spread rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum SpreadColumn {
    /// Asset symbol.
    #[strum(serialize = "asset")]
    Asset,
    /// A's bid.
    #[strum(serialize = "a_bid")]
    ABid,
    /// A's ask.
    #[strum(serialize = "a_ask")]
    AAsk,
    /// B's bid.
    #[strum(serialize = "b_bid")]
    BBid,
    /// B's ask.
    #[strum(serialize = "b_ask")]
    BAsk,
    /// Spread from A to B.
    #[default]
    #[strum(serialize = "spread_a_to_b")]
    SpreadAToB,
    /// Spread from B to A.
    #[strum(serialize = "spread_b_to_a")]
    SpreadBToA,
}

impl SpreadColumn {
    fn value(self, row: &SpreadRow) -> Option<Decimal> {
        match self {
            Self::Asset => None,
            Self::ABid => Some(row.a_bid),
            Self::AAsk => Some(row.a_ask),
            Self::BBid => Some(row.b_bid),
            Self::BAsk => Some(row.b_ask),
            Self::SpreadAToB => row.spread_a_to_b,
            Self::SpreadBToA => row.spread_b_to_a,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum SortDirection {
    /// Smallest first.
    #[strum(serialize = "asc", serialize = "ascending")]
    Ascending,
    /// Largest first.
    #[default]
    #[strum(serialize = "desc", serialize = "descending")]
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// Ordering for spread rows. Defaults to the A-to-B spread, largest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpreadOrder {
    /// Column compared.
    pub column: SpreadColumn,
    /// Direction.
    pub direction: SortDirection,
}

impl SpreadOrder {
    /// Order by `column` in `direction`.
    pub fn new(column: SpreadColumn, direction: SortDirection) -> Self {
        Self { column, direction }
    }
}

/// Percentage move from `reference` to `other`: `(other - reference) / reference * 100`.
///
/// Absent when `reference <= 0` or the arithmetic overflows.
pub fn percentage_spread(reference: Decimal, other: Decimal) -> Option<Decimal> {
    if reference <= Decimal::ZERO {
        return None;
    }
    other
        .checked_sub(reference)?
        .checked_div(reference)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// Build spread rows for `universe` between exchanges `a` and `b`.
///
/// Assets missing any of A.bid, A.ask, B.bid, B.ask are skipped.
pub fn compute_spreads(
    snapshot: &Snapshot,
    universe: &[Asset],
    a: &ExchangeId,
    b: &ExchangeId,
    order: SpreadOrder,
) -> Vec<SpreadRow> {
    let mut rows: Vec<SpreadRow> = universe
        .iter()
        .filter_map(|asset| {
            let quotes = snapshot.get(asset)?;
            let qa = quotes.get(a)?;
            let qb = quotes.get(b)?;
            let (a_bid, a_ask) = (qa.bid?, qa.ask?);
            let (b_bid, b_ask) = (qb.bid?, qb.ask?);

            Some(SpreadRow {
                asset: asset.clone(),
                a_symbol: qa.symbol.clone(),
                b_symbol: qb.symbol.clone(),
                a_bid,
                a_ask,
                b_bid,
                b_ask,
                spread_a_to_b: percentage_spread(a_bid, b_ask),
                spread_b_to_a: percentage_spread(b_bid, a_ask),
            })
        })
        .collect();

    sort_spreads(&mut rows, order);
    rows
}

/// Sort rows in place. Absent values always sort last; ties break by asset.
pub fn sort_spreads(rows: &mut [SpreadRow], order: SpreadOrder) {
    rows.sort_by(|x, y| {
        let primary = match order.column {
            SpreadColumn::Asset => order.direction.apply(x.asset.cmp(&y.asset)),
            column => match (column.value(x), column.value(y)) {
                (Some(vx), Some(vy)) => order.direction.apply(vx.cmp(&vy)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| x.asset.cmp(&y.asset))
    });
}
