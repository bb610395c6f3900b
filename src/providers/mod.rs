// =============================================================================
// Upstream Provider Adapters
// =============================================================================
//
// One adapter per provider, each normalizing responses into the shared record
// shapes and mapping tier denials to sentinels instead of errors. Retry
// policies apply to idempotent GETs only.

pub mod batch;
pub mod finnhub;
pub mod fmp;
pub mod orats;
