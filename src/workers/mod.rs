// =============================================================================
// Workers
// =============================================================================
//
// Long-lived polling loops, one per pipeline stage after ingestion: the
// signal processor advances pending signals through enrichment and
// orchestration; the order creator turns live recommendations into orders;
// the paper executor fills pending orders; the position refresher prices
// open positions and applies exit intelligence.
// =============================================================================

pub mod order_creator;
pub mod paper_executor;
pub mod position_refresher;
pub mod signal_processor;
