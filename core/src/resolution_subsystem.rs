//! Resolution subsystem: time-to-resolution against SLA goals.
//!
//! Execution order: After ReopeningSubsystem (slot 3).
//!
//! Only finished orders with a completion timestamp are measured.
//! A completion before creation is a data error: it is reported and left
//! out of every average.

use crate::{
    config::SlaGoals,
    error::InsightResult,
    event::InsightEvent,
    record::{pct, round2, Dataset, ServiceOrder},
    report::{DashboardReport, RunContext},
    subsystem::MetricsSubsystem,
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRow {
    pub key:             String,
    pub orders:          usize,
    pub avg_hours:       f64,
    /// Set for service-type rows; technician rows mix several goals.
    pub goal_hours:      Option<f64>,
    pub within_goal:     usize,
    pub within_goal_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub by_service_type: Vec<ResolutionRow>,
    pub by_technician:   Vec<ResolutionRow>,
    pub measured_orders: usize,
    pub within_goal:     usize,
    pub within_goal_pct: f64,
    pub avg_hours:       f64,
    pub invalid_spans:   Vec<OrderId>,
}

/// Hours between opening and completion; None when the order is not finished.
pub fn resolution_hours(order: &ServiceOrder) -> Option<f64> {
    if !order.is_finished() {
        return None;
    }
    let completed = order.completed_at?;
    Some((completed - order.created_at).num_minutes() as f64 / 60.0)
}

struct Measured<'a> {
    order: &'a ServiceOrder,
    hours: f64,
    goal:  f64,
}

fn measure<'a>(orders: &'a [ServiceOrder], goals: &SlaGoals) -> (Vec<Measured<'a>>, Vec<OrderId>) {
    let mut measured = Vec::new();
    let mut invalid = Vec::new();
    for o in orders {
        match resolution_hours(o) {
            Some(h) if h < 0.0 => invalid.push(o.order_id.clone()),
            Some(hours) => measured.push(Measured { order: o, hours, goal: goals.goal_for(&o.service_type) }),
            None => {}
        }
    }
    (measured, invalid)
}

fn rows_by<F>(measured: &[Measured<'_>], key_of: F, with_goal: bool) -> Vec<ResolutionRow>
where
    F: Fn(&ServiceOrder) -> &str,
{
    let mut groups: BTreeMap<&str, Vec<&Measured<'_>>> = BTreeMap::new();
    for m in measured {
        groups.entry(key_of(m.order)).or_default().push(m);
    }
    groups
        .into_iter()
        .map(|(key, items)| {
            let within = items.iter().filter(|m| m.hours <= m.goal).count();
            let total_hours: f64 = items.iter().map(|m| m.hours).sum();
            ResolutionRow {
                key: key.to_string(),
                orders: items.len(),
                avg_hours: round2(total_hours / items.len() as f64),
                goal_hours: if with_goal { items.first().map(|m| m.goal) } else { None },
                within_goal: within,
                within_goal_pct: pct(within, items.len()),
            }
        })
        .collect()
}

pub fn resolution_report(orders: &[ServiceOrder], goals: &SlaGoals) -> ResolutionReport {
    let (measured, invalid_spans) = measure(orders, goals);
    let within_goal = measured.iter().filter(|m| m.hours <= m.goal).count();
    let avg_hours = if measured.is_empty() {
        0.0
    } else {
        round2(measured.iter().map(|m| m.hours).sum::<f64>() / measured.len() as f64)
    };

    ResolutionReport {
        by_service_type: rows_by(&measured, |o| o.service_type.as_str(), true),
        by_technician: rows_by(&measured, |o| o.technician.as_str(), false),
        measured_orders: measured.len(),
        within_goal,
        within_goal_pct: pct(within_goal, measured.len()),
        avg_hours,
        invalid_spans,
    }
}

// ── Subsystem ──────────────────────────────────────────────────────

pub struct ResolutionSubsystem {
    goals: SlaGoals,
}

impl ResolutionSubsystem {
    pub fn new(goals: SlaGoals) -> Self {
        Self { goals }
    }
}

impl MetricsSubsystem for ResolutionSubsystem {
    fn name(&self) -> &'static str {
        "resolution"
    }

    fn update(
        &mut self,
        _ctx: &RunContext,
        dataset: &Dataset,
        report: &mut DashboardReport,
    ) -> InsightResult<Vec<InsightEvent>> {
        let section = resolution_report(&dataset.service_orders, &self.goals);

        let mut events: Vec<InsightEvent> = section
            .invalid_spans
            .iter()
            .map(|id| InsightEvent::NegativeResolutionSpan { order_id: id.clone() })
            .collect();
        events.push(InsightEvent::SlaComputed {
            orders: section.measured_orders,
            within_goal_pct: section.within_goal_pct,
        });

        log::debug!(
            "resolution: {} orders measured, {}% within goal",
            section.measured_orders,
            section.within_goal_pct
        );

        report.resolution = Some(section);
        Ok(events)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
