// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator implementations over ascending daily
// candle series. Every public function returns `Option<T>` so callers are
// forced to handle insufficient-data and numerical edge cases.

pub mod macd;
pub mod minervini;
pub mod rsi;
pub mod sma;
pub mod vwap;
