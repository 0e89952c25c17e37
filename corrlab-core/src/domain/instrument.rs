//! Static instrument attributes supplied by the universe table.

use serde::{Deserialize, Serialize};

/// One constituent of the universe: symbol plus display name and sector.
///
/// Field renames match the column headers of the constituent list
/// (`Symbol`, `Security`, `GICS Sector`); any other columns are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    #[serde(rename = "Symbol", alias = "symbol")]
    pub symbol: String,
    #[serde(rename = "Security", alias = "name")]
    pub name: String,
    #[serde(rename = "GICS Sector", alias = "sector")]
    pub sector: String,
}

impl InstrumentMeta {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, sector: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            sector: sector.into(),
        }
    }

    /// Symbol as requested from the market-data provider (`BRK.B` → `BRK-B`).
    pub fn provider_symbol(&self) -> String {
        provider_symbol(&self.symbol)
    }
}

/// Provider spelling of a symbol: class-share dots become dashes.
pub fn provider_symbol(symbol: &str) -> String {
    symbol.replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_shares_use_dash() {
        let m = InstrumentMeta::new("BRK.B", "Berkshire Hathaway", "Financials");
        assert_eq!(m.provider_symbol(), "BRK-B");
        assert_eq!(provider_symbol("AAPL"), "AAPL");
    }
}
