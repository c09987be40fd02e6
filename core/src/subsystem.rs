//! Subsystem trait.
//!
//! RULE: Every metrics section implements MetricsSubsystem.
//! The engine calls update() on each registered subsystem
//! in registration order, once per report run.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    error::InsightResult,
    event::InsightEvent,
    record::Dataset,
    report::{DashboardReport, RunContext},
};
use std::any::Any;

/// The contract every metrics subsystem must fulfill.
pub trait MetricsSubsystem {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// Called once per report run by the engine.
    ///
    /// - `ctx`:     run id and reference date
    /// - `dataset`: the filtered dataset for this run
    /// - `report`:  sections written by earlier subsystems; this
    ///              subsystem fills in its own section
    ///
    /// Returns the events to append to the run's event log.
    fn update(
        &mut self,
        ctx: &RunContext,
        dataset: &Dataset,
        report: &mut DashboardReport,
    ) -> InsightResult<Vec<InsightEvent>>;

    /// Lets the engine reach subsystem settings (volume tier selection).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
