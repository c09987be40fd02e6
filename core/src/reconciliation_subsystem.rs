//! Reconciliation subsystem: joins sales to first payments and
//! aggregates permanência.
//!
//! Execution order: first (slot 1). The bonus subsystem reads its section.
//!
//! Design:
//!   - Join key = normalized proposal number
//!   - Duplicate payments: latest billing date wins, ties go to the last row
//!   - Permanência period = month(activation or sale date) + N months
//!   - adimplência % = adimplentes / (adimplentes + inadimplentes + cancelados)
//!     Inclusões stay out of the denominator.

use crate::{
    config::ClassificationRules,
    error::InsightResult,
    event::InsightEvent,
    normalizer::normalize_proposal,
    payment_classifier::{classify, Classification, CustomerStatus},
    record::{month_key_after, pct, round2, Dataset, Payment, ProductTag, Sale, SaleSituation, Target},
    report::{DashboardReport, RunContext},
    subsystem::MetricsSubsystem,
    types::{MonthKey, ProposalId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledSale {
    pub sale:               Sale,
    pub payment:            Option<Payment>,
    pub classification:     Classification,
    pub permanencia_period: MonthKey,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total:         usize,
    pub adimplentes:   usize,
    pub inadimplentes: usize,
    pub cancelados:    usize,
    pub inclusoes:     usize,
    /// Adimplentes that only count as such because they have no payment yet.
    pub adimplentes_inclusao: usize,
}

impl StatusCounts {
    pub fn add(&mut self, c: &Classification) {
        self.total += 1;
        match c.status {
            CustomerStatus::Adimplente => {
                self.adimplentes += 1;
                if c.inclusion {
                    self.adimplentes_inclusao += 1;
                }
            }
            CustomerStatus::Inadimplente => self.inadimplentes += 1,
            CustomerStatus::Cancelado    => self.cancelados += 1,
            CustomerStatus::Inclusao     => self.inclusoes += 1,
        }
    }

    pub fn measured(&self) -> usize {
        self.adimplentes + self.inadimplentes + self.cancelados
    }

    pub fn adimplencia_pct(&self) -> f64 {
        pct(self.adimplentes, self.measured())
    }

    pub fn inadimplencia_pct(&self) -> f64 {
        pct(self.inadimplentes, self.measured())
    }

    pub fn cancelamento_pct(&self) -> f64 {
        pct(self.cancelados, self.measured())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Salesperson,
    City,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub key:               String,
    pub product_tag:       ProductTag,
    pub counts:            StatusCounts,
    pub adimplencia_pct:   f64,
    pub inadimplencia_pct: f64,
    pub cancelamento_pct:  f64,
}

impl SummaryRow {
    fn new(key: String, product_tag: ProductTag, counts: StatusCounts) -> Self {
        Self {
            key,
            product_tag,
            adimplencia_pct: counts.adimplencia_pct(),
            inadimplencia_pct: counts.inadimplencia_pct(),
            cancelamento_pct: counts.cancelamento_pct(),
            counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTrend {
    pub period:          MonthKey,
    pub product_tag:     ProductTag,
    pub counts:          StatusCounts,
    pub adimplencia_pct: f64,
    /// Percentage-point change against the previous period.
    pub delta_pp:        Option<f64>,
}

/// Sales volume and conversion per salesperson and product line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalespersonPerformance {
    pub salesperson:    String,
    pub product_tag:    ProductTag,
    pub total_sales:    usize,
    pub enabled_sales:  usize,
    pub conversion_pct: f64,
    pub target:         Option<u32>,
    /// Enabled sales over target; None without a target.
    pub attainment_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub sales:              Vec<ReconciledSale>,
    pub totals:             Vec<SummaryRow>,
    pub by_salesperson:     Vec<SummaryRow>,
    pub by_city:            Vec<SummaryRow>,
    pub trends:             Vec<PeriodTrend>,
    pub performance:        Vec<SalespersonPerformance>,
    pub unmatched_sales:    usize,
    pub orphan_payments:    usize,
    pub duplicate_payments: usize,
}

impl ReconciliationReport {
    /// Overall adimplência for one product line, if it had any sales.
    pub fn total_for(&self, tag: ProductTag) -> Option<&SummaryRow> {
        self.totals.iter().find(|r| r.product_tag == tag)
    }

    pub fn salesperson_row(&self, salesperson: &str, tag: ProductTag) -> Option<&SummaryRow> {
        self.by_salesperson
            .iter()
            .find(|r| r.key == salesperson && r.product_tag == tag)
    }
}

// ── Pure functions ─────────────────────────────────────────────────

/// Proposal → payment. Returns the index and the proposals seen more than once.
pub fn index_payments(payments: &[Payment]) -> (HashMap<String, &Payment>, Vec<(String, usize)>) {
    let mut index: HashMap<String, &Payment> = HashMap::new();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();

    for p in payments {
        let key = normalize_proposal(&p.proposal_id);
        *seen.entry(key.clone()).or_default() += 1;
        let replace = index
            .get(&key)
            .map_or(true, |existing| existing.billing_date <= p.billing_date);
        if replace {
            index.insert(key, p);
        }
    }

    let duplicates = seen.into_iter().filter(|(_, n)| *n > 1).collect();
    (index, duplicates)
}

/// Normalized proposals that have a payment but no sale, sorted.
pub fn orphan_payments(sales: &[Sale], payments: &[Payment]) -> Vec<ProposalId> {
    let sold: HashSet<String> = sales
        .iter()
        .map(|s| normalize_proposal(&s.proposal_id))
        .collect();
    let (index, _) = index_payments(payments);
    let mut orphans: Vec<ProposalId> = index
        .into_keys()
        .filter(|k| !sold.contains(k))
        .collect();
    orphans.sort();
    orphans
}

pub fn permanencia_period(sale: &Sale, months: u32) -> MonthKey {
    month_key_after(sale.anchor_date(), months)
}

pub fn reconcile(
    sales: &[Sale],
    payments: &[Payment],
    reference: NaiveDate,
    rules: &ClassificationRules,
) -> Vec<ReconciledSale> {
    let (index, _) = index_payments(payments);
    sales
        .iter()
        .map(|sale| {
            let payment = index.get(&normalize_proposal(&sale.proposal_id)).copied();
            ReconciledSale {
                classification: classify(payment, sale.product_tag, reference, rules),
                payment: payment.cloned(),
                permanencia_period: permanencia_period(sale, rules.permanencia_months),
                sale: sale.clone(),
            }
        })
        .collect()
}

pub fn summarize(rows: &[ReconciledSale], group_by: GroupBy) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<(String, ProductTag), StatusCounts> = BTreeMap::new();
    for r in rows {
        let key = match group_by {
            GroupBy::Salesperson => r.sale.salesperson.clone(),
            GroupBy::City        => r.sale.city.clone(),
        };
        groups
            .entry((key, r.sale.product_tag))
            .or_default()
            .add(&r.classification);
    }
    groups
        .into_iter()
        .map(|((key, tag), counts)| SummaryRow::new(key, tag, counts))
        .collect()
}

pub fn totals(rows: &[ReconciledSale]) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<ProductTag, StatusCounts> = BTreeMap::new();
    for r in rows {
        groups.entry(r.sale.product_tag).or_default().add(&r.classification);
    }
    groups
        .into_iter()
        .map(|(tag, counts)| SummaryRow::new(tag.label().to_string(), tag, counts))
        .collect()
}

/// Adimplência per permanência period for one product line, oldest first.
pub fn period_trend(rows: &[ReconciledSale], tag: ProductTag) -> Vec<PeriodTrend> {
    let mut periods: BTreeMap<&str, StatusCounts> = BTreeMap::new();
    for r in rows.iter().filter(|r| r.sale.product_tag == tag) {
        periods
            .entry(r.permanencia_period.as_str())
            .or_default()
            .add(&r.classification);
    }

    let mut out: Vec<PeriodTrend> = Vec::with_capacity(periods.len());
    for (period, counts) in periods {
        let adimplencia_pct = counts.adimplencia_pct();
        let delta_pp = out.last().map(|prev| round2(adimplencia_pct - prev.adimplencia_pct));
        out.push(PeriodTrend {
            period: period.to_string(),
            product_tag: tag,
            counts,
            adimplencia_pct,
            delta_pp,
        });
    }
    out
}

pub fn salesperson_performance(rows: &[ReconciledSale], targets: &[Target]) -> Vec<SalespersonPerformance> {
    let mut volume: BTreeMap<(String, ProductTag), (usize, usize)> = BTreeMap::new();
    for r in rows {
        let entry = volume
            .entry((r.sale.salesperson.clone(), r.sale.product_tag))
            .or_default();
        entry.0 += 1;
        if r.sale.situation == SaleSituation::Habilitada {
            entry.1 += 1;
        }
    }

    let mut goal: HashMap<(String, ProductTag), u32> = HashMap::new();
    for t in targets {
        *goal.entry((t.salesperson.trim().to_uppercase(), t.product_tag)).or_default() += t.quantity;
    }

    volume
        .into_iter()
        .map(|((salesperson, tag), (total, enabled))| {
            let target = goal.get(&(salesperson.trim().to_uppercase(), tag)).copied();
            SalespersonPerformance {
                attainment_pct: target.filter(|t| *t > 0).map(|t| pct(enabled, t as usize)),
                target,
                conversion_pct: pct(enabled, total),
                total_sales: total,
                enabled_sales: enabled,
                product_tag: tag,
                salesperson,
            }
        })
        .collect()
}

// ── Subsystem ──────────────────────────────────────────────────────

pub struct ReconciliationSubsystem {
    rules: ClassificationRules,
}

impl ReconciliationSubsystem {
    pub fn new(rules: ClassificationRules) -> Self {
        Self { rules }
    }
}

impl MetricsSubsystem for ReconciliationSubsystem {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn update(
        &mut self,
        ctx: &RunContext,
        dataset: &Dataset,
        report: &mut DashboardReport,
    ) -> InsightResult<Vec<InsightEvent>> {
        let mut events = Vec::new();

        let (_, duplicates) = index_payments(&dataset.payments);
        for (proposal_id, records) in &duplicates {
            events.push(InsightEvent::DuplicatePayment {
                proposal_id: proposal_id.clone(),
                records: *records,
            });
        }

        let rows = reconcile(&dataset.sales, &dataset.payments, ctx.reference_date, &self.rules);

        let mut unmatched = 0;
        for r in rows.iter().filter(|r| r.payment.is_none()) {
            unmatched += 1;
            events.push(InsightEvent::UnmatchedSale {
                proposal_id: r.sale.proposal_id.clone(),
                product_tag: r.sale.product_tag,
                status: r.classification.status,
            });
        }

        let orphans = orphan_payments(&dataset.sales, &dataset.payments);

        let totals = totals(&rows);
        for t in &totals {
            events.push(InsightEvent::ReconciliationComputed {
                product_tag: t.product_tag,
                sales: t.counts.total,
                adimplencia_pct: t.adimplencia_pct,
            });
        }

        let trends = totals
            .iter()
            .flat_map(|t| period_trend(&rows, t.product_tag))
            .collect();

        log::debug!(
            "reconciliation: {} sales, {} unmatched, {} orphan payments",
            rows.len(),
            unmatched,
            orphans.len()
        );

        report.reconciliation = Some(ReconciliationReport {
            by_salesperson: summarize(&rows, GroupBy::Salesperson),
            by_city: summarize(&rows, GroupBy::City),
            performance: salesperson_performance(&rows, &dataset.targets),
            unmatched_sales: unmatched,
            duplicate_payments: duplicates.len(),
            orphan_payments: orphans.len(),
            totals,
            trends,
            sales: rows,
        });

        Ok(events)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
