//! `insight-core`: metrics engine behind the SysGest Insight dashboard.
//!
//! Sheets go in through `engine::InsightEngine::import_sheet`, a run goes
//! through the subsystems in a fixed order, and a `report::DashboardReport`
//! comes out. The subsystem modules also expose their rules as plain
//! functions over record slices.

pub mod bonus_subsystem;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod import;
pub mod normalizer;
pub mod payment_classifier;
pub mod reconciliation_subsystem;
pub mod record;
pub mod reopening_subsystem;
pub mod report;
pub mod resolution_subsystem;
pub mod store;
pub mod subsystem;
pub mod types;
