//! Enrichment stage: projection coordinates joined with metadata and recent
//! returns.
//!
//! Two left joins keyed by symbol:
//! 1. projection ⟕ metadata: an instrument without metadata keeps its row
//!    with `name`/`sector` unset.
//! 2. (projection + metadata) ⟕ long-form returns: one output row per
//!    (instrument, timestamp) that has a return in the window. Instruments
//!    with no returns in the window produce no rows.
//!
//! Output order: projection order, then timestamp.

use crate::domain::InstrumentMeta;
use crate::projection::ProjectionTable;
use crate::table::{LongReturn, ReturnKind, ReturnTable};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A projected instrument with its (optional) static attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedInstrument {
    pub symbol: String,
    pub d1: f64,
    pub d2: f64,
    pub name: Option<String>,
    pub sector: Option<String>,
}

/// One row of the visualization input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub symbol: String,
    pub d1: f64,
    pub d2: f64,
    pub timestamp: NaiveDateTime,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub value: f64,
}

/// Left join of projection rows with metadata.
pub fn attach_metadata(
    projection: &ProjectionTable,
    metadata: &[InstrumentMeta],
) -> Vec<ProjectedInstrument> {
    let by_symbol: HashMap<&str, &InstrumentMeta> =
        metadata.iter().map(|m| (m.symbol.as_str(), m)).collect();

    projection
        .iter()
        .map(|(symbol, [d1, d2])| {
            let meta = by_symbol.get(symbol);
            ProjectedInstrument {
                symbol: symbol.to_string(),
                d1,
                d2,
                name: meta.map(|m| m.name.clone()),
                sector: meta.map(|m| m.sector.clone()),
            }
        })
        .collect()
}

/// Join long-form returns onto projected instruments.
pub fn enrich(
    projection: &ProjectionTable,
    metadata: &[InstrumentMeta],
    returns: &[LongReturn],
) -> Vec<EnrichedRow> {
    let mut by_symbol: HashMap<&str, Vec<&LongReturn>> = HashMap::new();
    for r in returns {
        by_symbol.entry(r.symbol.as_str()).or_default().push(r);
    }
    for rows in by_symbol.values_mut() {
        rows.sort_by_key(|r| r.timestamp);
    }

    let mut out = Vec::with_capacity(returns.len());
    for inst in attach_metadata(projection, metadata) {
        let Some(rows) = by_symbol.get(inst.symbol.as_str()) else {
            continue;
        };
        for r in rows {
            out.push(EnrichedRow {
                symbol: inst.symbol.clone(),
                d1: inst.d1,
                d2: inst.d2,
                timestamp: r.timestamp,
                name: inst.name.clone(),
                sector: inst.sector.clone(),
                value: r.value,
            });
        }
    }
    out
}

/// Restrict `table` to `timestamp >= start`, melt its simple returns, and
/// enrich.
pub fn enrich_window(
    projection: &ProjectionTable,
    metadata: &[InstrumentMeta],
    table: &ReturnTable,
    start: NaiveDateTime,
) -> Vec<EnrichedRow> {
    let long = table.since(start).melt(ReturnKind::Simple);
    enrich(projection, metadata, &long)
}

/// Distinct timestamps present in `rows`, ascending.
pub fn frame_timestamps(rows: &[EnrichedRow]) -> Vec<NaiveDateTime> {
    let mut ts: Vec<NaiveDateTime> = rows.iter().map(|r| r.timestamp).collect();
    ts.sort();
    ts.dedup();
    ts
}
