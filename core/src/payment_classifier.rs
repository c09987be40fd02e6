//! Payment classifier: one customer, one billing state.
//!
//! Cascade (first match wins, codes compared trimmed and accent-folded):
//!   1. No payment record   → BL-DGO: adimplente (inclusão); other: inclusão
//!   2. Cancel package code → cancelado
//!   3. Suspension code     → inadimplente
//!   4. Inclusion step code → inclusão
//!   5. Empty / paid step   → adimplente
//!   6. Numeric step ≥ delinquent step:
//!        billing date on/before reference → inadimplente
//!        otherwise                        → adimplente (not yet due)
//!   7. Anything else       → adimplente

use crate::{
    config::ClassificationRules,
    normalizer::fold_accents,
    record::{Payment, ProductTag},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Adimplente,
    Inadimplente,
    Cancelado,
    Inclusao,
}

/// Which cascade step produced the status. Kept for drill-down tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    MissingPaymentBlDgo,
    MissingPayment,
    CancelCode,
    SuspensionCode,
    InclusionStep,
    PaidStep,
    OverdueStep,
    NotYetDue,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status:    CustomerStatus,
    /// True when the customer counts as adimplente only because it has not
    /// reached the billing base yet.
    pub inclusion: bool,
    pub rule:      ClassificationRule,
}

impl Classification {
    fn of(status: CustomerStatus, rule: ClassificationRule) -> Self {
        Self { status, inclusion: status == CustomerStatus::Inclusao, rule }
    }
}

fn in_codes(value: &str, codes: &[String]) -> bool {
    let v = fold_accents(value.trim());
    codes.iter().any(|c| fold_accents(c.trim()) == v)
}

pub fn classify(
    payment: Option<&Payment>,
    tag: ProductTag,
    reference: NaiveDate,
    rules: &ClassificationRules,
) -> Classification {
    use ClassificationRule as R;
    use CustomerStatus as S;

    let Some(p) = payment else {
        return if tag == ProductTag::BlDgo {
            Classification { status: S::Adimplente, inclusion: true, rule: R::MissingPaymentBlDgo }
        } else {
            Classification::of(S::Inclusao, R::MissingPayment)
        };
    };

    if in_codes(&p.package_status, &rules.cancel_codes) {
        return Classification::of(S::Cancelado, R::CancelCode);
    }
    if in_codes(&p.package_status, &rules.suspension_codes) {
        return Classification::of(S::Inadimplente, R::SuspensionCode);
    }

    let step = p.step_code.trim();
    if in_codes(step, &rules.inclusion_codes) {
        return Classification::of(S::Inclusao, R::InclusionStep);
    }
    if step.is_empty() || in_codes(step, &rules.paid_steps) {
        return Classification::of(S::Adimplente, R::PaidStep);
    }

    match step.parse::<u32>() {
        Ok(n) if n >= rules.delinquent_step => match p.billing_date {
            Some(billed) if billed <= reference => Classification::of(S::Inadimplente, R::OverdueStep),
            _ => Classification::of(S::Adimplente, R::NotYetDue),
        },
        _ => Classification::of(S::Adimplente, R::Fallback),
    }
}
