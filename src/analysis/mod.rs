// =============================================================================
// Analysis Module — indicator aggregation, options math, exits, sizing
// =============================================================================

pub mod exit_plan;
pub mod options;
pub mod sizing;
pub mod technical;
