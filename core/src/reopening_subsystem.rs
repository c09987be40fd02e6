//! Reopening subsystem: pairs follow-up orders with the order they reopen.
//!
//! Execution order: After ReconciliationSubsystem (slot 2).
//!
//! Design:
//!   - Candidate = order whose subtype is a reopening type (Corretiva family)
//!   - Original  = most recent finished or completed order of the same client
//!     and the same category, closed before the candidate was opened and
//!     within the window
//!   - Candidates are processed in creation order; an original is paired once
//!   - The reopening is charged to the original's technician

use crate::{
    config::ReopeningRules,
    error::InsightResult,
    event::InsightEvent,
    record::{month_key, pct, BaseData, Dataset, ServiceCategory, ServiceOrder},
    report::{DashboardReport, RunContext},
    subsystem::MetricsSubsystem,
    types::{ClientCode, MonthKey, OrderId},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReopeningPair {
    pub reopening_order_id:     OrderId,
    pub original_order_id:      OrderId,
    pub client_code:            ClientCode,
    pub category:               ServiceCategory,
    /// Technician of the original order.
    pub technician:             String,
    pub reopening_technician:   String,
    pub city:                   String,
    pub original_service_type:  String,
    pub reopening_service_type: String,
    pub days_between:           i64,
    /// Month the reopening was opened.
    pub month:                  MonthKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReopeningDimension {
    Technician,
    City,
    ServiceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReopeningRateRow {
    pub key:        String,
    pub originals:  usize,
    pub reopenings: usize,
    pub rate_pct:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRateRow {
    pub month:       MonthKey,
    pub city:        Option<String>,
    pub reopenings:  usize,
    pub subscribers: u64,
    pub rate_pct:    f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReopeningReport {
    pub pairs:            Vec<ReopeningPair>,
    pub by_technician:    Vec<ReopeningRateRow>,
    pub by_city:          Vec<ReopeningRateRow>,
    pub by_service_type:  Vec<ReopeningRateRow>,
    pub over_base:        Vec<BaseRateRow>,
    pub total_originals:  usize,
    pub total_reopenings: usize,
    pub overall_rate_pct: f64,
}

// ── Pair matching ──────────────────────────────────────────────────

pub fn match_reopenings(orders: &[ServiceOrder], rules: &ReopeningRules) -> Vec<ReopeningPair> {
    let window = Duration::days(rules.window_days);

    let mut originals: HashMap<(&str, ServiceCategory), Vec<&ServiceOrder>> = HashMap::new();
    for o in orders.iter().filter(|o| o.can_be_original() && !o.client_code.is_empty()) {
        originals
            .entry((o.client_code.as_str(), o.category))
            .or_default()
            .push(o);
    }

    let mut candidates: Vec<&ServiceOrder> = orders
        .iter()
        .filter(|o| rules.is_reopening_type(&o.service_type) && !o.client_code.is_empty())
        .collect();
    candidates.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });

    let mut used: HashSet<&str> = HashSet::new();
    let mut pairs = Vec::new();

    for cand in candidates {
        let Some(pool) = originals.get(&(cand.client_code.as_str(), cand.category)) else {
            continue;
        };
        let best = pool
            .iter()
            .filter(|o| o.order_id != cand.order_id && !used.contains(o.order_id.as_str()))
            .filter(|o| {
                let closed = o.closed_at();
                closed < cand.created_at && cand.created_at - closed <= window
            })
            .max_by(|a, b| {
                a.closed_at()
                    .cmp(&b.closed_at())
                    .then_with(|| a.order_id.cmp(&b.order_id))
            })
            .copied();

        if let Some(original) = best {
            used.insert(original.order_id.as_str());
            pairs.push(ReopeningPair {
                reopening_order_id: cand.order_id.clone(),
                original_order_id: original.order_id.clone(),
                client_code: cand.client_code.clone(),
                category: cand.category,
                technician: original.technician.clone(),
                reopening_technician: cand.technician.clone(),
                city: original.city.clone(),
                original_service_type: original.service_type.clone(),
                reopening_service_type: cand.service_type.clone(),
                days_between: (cand.created_at - original.closed_at()).num_days(),
                month: month_key(cand.created_at.date()),
            });
        }
    }
    pairs
}

// ── Rates ──────────────────────────────────────────────────────────

pub fn reopening_rates(
    orders: &[ServiceOrder],
    pairs: &[ReopeningPair],
    dimension: ReopeningDimension,
) -> Vec<ReopeningRateRow> {
    let mut rows: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for o in orders.iter().filter(|o| o.can_be_original()) {
        let key = match dimension {
            ReopeningDimension::Technician  => &o.technician,
            ReopeningDimension::City        => &o.city,
            ReopeningDimension::ServiceType => &o.service_type,
        };
        rows.entry(key.clone()).or_default().0 += 1;
    }
    for p in pairs {
        let key = match dimension {
            ReopeningDimension::Technician  => &p.technician,
            ReopeningDimension::City        => &p.city,
            ReopeningDimension::ServiceType => &p.original_service_type,
        };
        rows.entry(key.clone()).or_default().1 += 1;
    }
    rows.into_iter()
        .map(|(key, (originals, reopenings))| ReopeningRateRow {
            key,
            originals,
            reopenings,
            rate_pct: pct(reopenings, originals),
        })
        .collect()
}

/// Reopenings in a month over that month's subscriber base.
pub fn reopening_rate_over_base(pairs: &[ReopeningPair], base: &[BaseData]) -> Vec<BaseRateRow> {
    base.iter()
        .map(|b| {
            let reopenings = pairs
                .iter()
                .filter(|p| p.month == b.month)
                .filter(|p| {
                    b.city
                        .as_deref()
                        .map_or(true, |c| c.trim().eq_ignore_ascii_case(p.city.trim()))
                })
                .count();
            BaseRateRow {
                month: b.month.clone(),
                city: b.city.clone(),
                reopenings,
                subscribers: b.subscribers,
                rate_pct: pct(reopenings, b.subscribers as usize),
            }
        })
        .collect()
}

// ── Subsystem ──────────────────────────────────────────────────────

pub struct ReopeningSubsystem {
    rules: ReopeningRules,
}

impl ReopeningSubsystem {
    pub fn new(rules: ReopeningRules) -> Self {
        Self { rules }
    }
}

impl MetricsSubsystem for ReopeningSubsystem {
    fn name(&self) -> &'static str {
        "reopening"
    }

    fn update(
        &mut self,
        _ctx: &RunContext,
        dataset: &Dataset,
        report: &mut DashboardReport,
    ) -> InsightResult<Vec<InsightEvent>> {
        let orders = &dataset.service_orders;
        let pairs = match_reopenings(orders, &self.rules);

        let events = pairs
            .iter()
            .map(|p| InsightEvent::ReopeningDetected {
                reopening_order_id: p.reopening_order_id.clone(),
                original_order_id: p.original_order_id.clone(),
                technician: p.technician.clone(),
                days_between: p.days_between,
            })
            .collect::<Vec<_>>();

        let total_originals = orders.iter().filter(|o| o.can_be_original()).count();

        log::debug!(
            "reopening: {} closed orders, {} reopenings",
            total_originals,
            pairs.len()
        );

        report.reopening = Some(ReopeningReport {
            by_technician: reopening_rates(orders, &pairs, ReopeningDimension::Technician),
            by_city: reopening_rates(orders, &pairs, ReopeningDimension::City),
            by_service_type: reopening_rates(orders, &pairs, ReopeningDimension::ServiceType),
            over_base: reopening_rate_over_base(&pairs, &dataset.base),
            total_originals,
            total_reopenings: pairs.len(),
            overall_rate_pct: pct(pairs.len(), total_originals),
            pairs,
        });

        Ok(events)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
