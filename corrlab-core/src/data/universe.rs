//! Universe configuration: the constituent list with names and sectors.
//!
//! Loaded from a CSV with `Symbol`, `Security`, `GICS Sector` columns (any
//! other columns are ignored) or from TOML `[[instruments]]` tables. The
//! instrument list is kept sorted by symbol.

use super::provider::DataError;
use crate::domain::InstrumentMeta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// The instruments a pipeline run covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    instruments: Vec<InstrumentMeta>,
}

/// TOML shape: `[[instruments]]` with lowercase keys.
#[derive(Debug, Serialize, Deserialize)]
struct UniverseToml {
    instruments: Vec<TomlInstrument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TomlInstrument {
    symbol: String,
    name: String,
    sector: String,
}

impl Universe {
    /// Sort by symbol and reject duplicates or blank symbols.
    pub fn new(mut instruments: Vec<InstrumentMeta>) -> Result<Self, DataError> {
        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let mut seen = HashSet::new();
        for inst in &instruments {
            if inst.symbol.trim().is_empty() {
                return Err(DataError::Universe("empty symbol".into()));
            }
            if !seen.insert(inst.symbol.as_str()) {
                return Err(DataError::Universe(format!(
                    "duplicate symbol '{}'",
                    inst.symbol
                )));
            }
        }
        Ok(Self { instruments })
    }

    /// Load from a `.toml` file, or CSV for any other extension.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataError::Universe(format!("read universe file {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_csv_reader(content.as_bytes()),
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let instruments = rdr
            .deserialize::<InstrumentMeta>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DataError::Universe(format!("parse universe CSV: {e}")))?;
        Self::new(instruments)
    }

    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let parsed: UniverseToml = toml::from_str(content)
            .map_err(|e| DataError::Universe(format!("parse universe TOML: {e}")))?;
        Self::new(
            parsed
                .instruments
                .into_iter()
                .map(|i| InstrumentMeta::new(i.symbol, i.name, i.sector))
                .collect(),
        )
    }

    pub fn to_toml(&self) -> Result<String, DataError> {
        let doc = UniverseToml {
            instruments: self
                .instruments
                .iter()
                .map(|m| TomlInstrument {
                    symbol: m.symbol.clone(),
                    name: m.name.clone(),
                    sector: m.sector.clone(),
                })
                .collect(),
        };
        toml::to_string_pretty(&doc).map_err(|e| DataError::Universe(format!("serialize universe: {e}")))
    }

    /// CSV with the `Symbol,Security,GICS Sector` header.
    pub fn to_csv(&self) -> Result<String, DataError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for inst in &self.instruments {
            wtr.serialize(inst)
                .map_err(|e| DataError::Universe(format!("serialize universe: {e}")))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| DataError::Universe(format!("flush universe CSV: {e}")))?;
        String::from_utf8(bytes).map_err(|e| DataError::Universe(e.to_string()))
    }

    pub fn instruments(&self) -> &[InstrumentMeta] {
        &self.instruments
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.instruments.iter().map(|i| i.symbol.as_str()).collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentMeta> {
        self.instruments
            .binary_search_by(|i| i.symbol.as_str().cmp(symbol))
            .ok()
            .map(|idx| &self.instruments[idx])
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// A small cross-sector sample of large US constituents.
    pub fn sample_us() -> Self {
        let rows = [
            ("AAPL", "Apple Inc.", "Information Technology"),
            ("MSFT", "Microsoft", "Information Technology"),
            ("NVDA", "Nvidia", "Information Technology"),
            ("GOOGL", "Alphabet Inc. (Class A)", "Communication Services"),
            ("META", "Meta Platforms", "Communication Services"),
            ("AMZN", "Amazon", "Consumer Discretionary"),
            ("HD", "Home Depot (The)", "Consumer Discretionary"),
            ("JPM", "JPMorgan Chase", "Financials"),
            ("BRK.B", "Berkshire Hathaway", "Financials"),
            ("GS", "Goldman Sachs", "Financials"),
            ("JNJ", "Johnson & Johnson", "Health Care"),
            ("UNH", "UnitedHealth Group", "Health Care"),
            ("LLY", "Lilly (Eli)", "Health Care"),
            ("XOM", "ExxonMobil", "Energy"),
            ("CVX", "Chevron Corporation", "Energy"),
            ("PG", "Procter & Gamble", "Consumer Staples"),
            ("KO", "Coca-Cola Company (The)", "Consumer Staples"),
            ("CAT", "Caterpillar Inc.", "Industrials"),
            ("NEE", "NextEra Energy", "Utilities"),
            ("LIN", "Linde plc", "Materials"),
            ("PLD", "Prologis", "Real Estate"),
        ];
        Self {
            instruments: {
                let mut v: Vec<InstrumentMeta> = rows
                    .iter()
                    .map(|(s, n, g)| InstrumentMeta::new(*s, *n, *g))
                    .collect();
                v.sort_by(|a, b| a.symbol.cmp(&b.symbol));
                v
            },
        }
    }
}
