//! The run event log.
//!
//! RULE: Anything a user would ask "why is this number what it is?" about
//! is recorded as an event: rejected rows, unmatched sales, detected
//! reopenings, computed bonuses.

use crate::{
    import::SheetKind,
    payment_classifier::CustomerStatus,
    record::ProductTag,
    types::{BatchId, OrderId, ProposalId, RunId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Every event emitted during imports and report runs.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsightEvent {
    // ── Engine events ──────────────────────────────
    RunStarted {
        run_id: RunId,
        reference_date: NaiveDate,
    },
    RunCompleted {
        run_id: RunId,
    },

    // ── Import events ──────────────────────────────
    ImportCompleted {
        batch_id: BatchId,
        sheet: SheetKind,
        accepted: usize,
        rejected: usize,
    },
    RowRejected {
        batch_id: BatchId,
        sheet: SheetKind,
        line: usize,
        reason: String,
    },

    // ── Reconciliation events ──────────────────────
    UnmatchedSale {
        proposal_id: ProposalId,
        product_tag: ProductTag,
        status: CustomerStatus,
    },
    DuplicatePayment {
        proposal_id: ProposalId,
        records: usize,
    },
    ReconciliationComputed {
        product_tag: ProductTag,
        sales: usize,
        adimplencia_pct: f64,
    },

    // ── Reopening events ───────────────────────────
    ReopeningDetected {
        reopening_order_id: OrderId,
        original_order_id: OrderId,
        technician: String,
        days_between: i64,
    },

    // ── Resolution events ──────────────────────────
    NegativeResolutionSpan {
        order_id: OrderId,
    },
    SlaComputed {
        orders: usize,
        within_goal_pct: f64,
    },

    // ── Bonus events ───────────────────────────────
    BonusComputed {
        salesperson: String,
        product_tag: ProductTag,
        bonus_value: f64,
    },
}

/// A persisted event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub seq:        u64,
    pub subsystem:  String,
    pub event_type: String,
    pub payload:    String,
}
