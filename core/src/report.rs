//! Dashboard report: the structured result of one run.
//!
//! A report is serialized to JSON and stored as the run's snapshot, so a
//! dashboard can be redrawn without recomputing it.

use crate::{
    bonus_subsystem::BonusReport,
    reconciliation_subsystem::ReconciliationReport,
    record::{month_key, Dataset, ProductTag},
    reopening_subsystem::ReopeningReport,
    resolution_subsystem::ResolutionReport,
    types::RunId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id:         RunId,
    /// "Today" for the classifier: billing dates after it are not yet due.
    pub reference_date: NaiveDate,
}

/// Dashboard filters, applied to the dataset before a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub from:        Option<NaiveDate>,
    pub to:          Option<NaiveDate>,
    pub city:        Option<String>,
    pub salesperson: Option<String>,
    pub product_tag: Option<ProductTag>,
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

impl ReportFilter {
    fn in_range(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |f| date >= f) && self.to.map_or(true, |t| date <= t)
    }

    /// Month keys compare as text, so `"2024-01" <= "2024-02"` holds.
    fn month_in_range(&self, month: &str) -> bool {
        self.from.map_or(true, |f| month >= month_key(f).as_str())
            && self.to.map_or(true, |t| month <= month_key(t).as_str())
    }

    /// Sales and orders are filtered on their own dates, targets on the
    /// months the date range touches. Payments are kept whole since they
    /// are only reached through a sale.
    pub fn apply(&self, dataset: &Dataset) -> Dataset {
        let city_ok = |city: &str| self.city.as_deref().map_or(true, |c| same_text(c, city));
        let seller_ok =
            |seller: &str| self.salesperson.as_deref().map_or(true, |s| same_text(s, seller));
        let tag_ok = |tag: ProductTag| self.product_tag.map_or(true, |t| t == tag);

        Dataset {
            service_orders: dataset
                .service_orders
                .iter()
                .filter(|o| self.in_range(o.created_at.date()) && city_ok(&o.city))
                .cloned()
                .collect(),
            sales: dataset
                .sales
                .iter()
                .filter(|s| {
                    self.in_range(s.sale_date)
                        && city_ok(&s.city)
                        && seller_ok(&s.salesperson)
                        && tag_ok(s.product_tag)
                })
                .cloned()
                .collect(),
            payments: dataset.payments.clone(),
            targets: dataset
                .targets
                .iter()
                .filter(|t| {
                    self.month_in_range(&t.month)
                        && seller_ok(&t.salesperson)
                        && tag_ok(t.product_tag)
                })
                .cloned()
                .collect(),
            base: dataset
                .base
                .iter()
                .filter(|b| b.city.as_deref().map_or(true, city_ok))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    pub run_id:         RunId,
    pub reference_date: NaiveDate,
    pub filter:         ReportFilter,
    pub reconciliation: Option<ReconciliationReport>,
    pub reopening:      Option<ReopeningReport>,
    pub resolution:     Option<ResolutionReport>,
    pub bonus:          Option<BonusReport>,
}

impl DashboardReport {
    pub fn new(ctx: &RunContext, filter: ReportFilter) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            reference_date: ctx.reference_date,
            filter,
            reconciliation: None,
            reopening: None,
            resolution: None,
            bonus: None,
        }
    }
}
