//! Domain types for CorrLab

pub mod granularity;
pub mod instrument;
pub mod series;

pub use granularity::Granularity;
pub use instrument::{provider_symbol, InstrumentMeta};
pub use series::{PriceSeries, ReturnSeries, SeriesError};
