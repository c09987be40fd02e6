//! Bonus subsystem: permanência and volume tiers to a bonus value.
//!
//! Execution order: last (slot 4). Reads the reconciliation section.
//!
//! bonus = base value × permanência multiplier % × meta bonus %
//!
//! The permanência multiplier comes from the salesperson's adimplência in
//! that product line. The meta bonus comes from a volume tier, which is
//! either picked by hand (dashboard selector) or derived from attainment
//! against the imported targets.

use crate::{
    config::{BonusTables, VolumeThresholds},
    error::InsightResult,
    event::InsightEvent,
    record::{round2, Dataset, ProductTag},
    report::{DashboardReport, RunContext},
    subsystem::MetricsSubsystem,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTier {
    Abaixo,
    Parcial,
    Meta,
    Supermeta,
}

impl VolumeTier {
    pub fn from_label(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "abaixo"    => Some(VolumeTier::Abaixo),
            "parcial"   => Some(VolumeTier::Parcial),
            "meta"      => Some(VolumeTier::Meta),
            "supermeta" => Some(VolumeTier::Supermeta),
            _           => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusLine {
    pub salesperson:                String,
    pub product_tag:                ProductTag,
    pub adimplencia_pct:            f64,
    pub permanencia_multiplier_pct: f64,
    pub attainment_pct:             Option<f64>,
    pub volume_tier:                VolumeTier,
    pub meta_bonus_pct:             f64,
    pub base_value:                 f64,
    pub bonus_value:                f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusReport {
    pub lines:       Vec<BonusLine>,
    pub total_bonus: f64,
}

// ── Lookups ────────────────────────────────────────────────────────

/// Highest tier whose `min_pct` does not exceed `adimplencia_pct`; 0 below all tiers.
pub fn permanencia_multiplier(tables: &BonusTables, tag: ProductTag, adimplencia_pct: f64) -> f64 {
    tables
        .permanencia
        .get(&tag)
        .and_then(|tiers| tiers.iter().rev().find(|t| adimplencia_pct >= t.min_pct))
        .map(|t| t.multiplier_pct)
        .unwrap_or(0.0)
}

pub fn volume_tier(thresholds: &VolumeThresholds, attainment_pct: f64) -> VolumeTier {
    if attainment_pct >= thresholds.supermeta_min_pct {
        VolumeTier::Supermeta
    } else if attainment_pct >= thresholds.meta_min_pct {
        VolumeTier::Meta
    } else if attainment_pct >= thresholds.parcial_min_pct {
        VolumeTier::Parcial
    } else {
        VolumeTier::Abaixo
    }
}

pub fn meta_bonus(tables: &BonusTables, tier: VolumeTier) -> f64 {
    tables.meta_bonus.get(&tier).copied().unwrap_or(0.0)
}

pub fn compose(base_value: f64, permanencia_pct: f64, meta_pct: f64) -> f64 {
    round2(base_value * (permanencia_pct / 100.0) * (meta_pct / 100.0))
}

// ── Subsystem ──────────────────────────────────────────────────────

pub struct BonusSubsystem {
    tables: BonusTables,
    /// Hand-picked tiers by salesperson (uppercased), as in the dashboard selector.
    selections: BTreeMap<String, VolumeTier>,
    /// Tier applied to everyone without a hand-picked one.
    fixed_tier: Option<VolumeTier>,
}

impl BonusSubsystem {
    pub fn new(tables: BonusTables) -> Self {
        Self { tables, selections: BTreeMap::new(), fixed_tier: None }
    }

    pub fn select_tier(&mut self, salesperson: &str, tier: VolumeTier) {
        self.selections.insert(salesperson.trim().to_uppercase(), tier);
    }

    pub fn set_fixed_tier(&mut self, tier: Option<VolumeTier>) {
        self.fixed_tier = tier;
    }

    /// Hand-picked tier, then the fixed tier, then attainment. Without a
    /// target nothing can be measured and the line is paid at meta.
    fn tier_for(&self, salesperson: &str, attainment_pct: Option<f64>) -> VolumeTier {
        self.selections
            .get(&salesperson.trim().to_uppercase())
            .copied()
            .or(self.fixed_tier)
            .unwrap_or_else(|| match attainment_pct {
                Some(a) => volume_tier(&self.tables.volume_thresholds, a),
                None => VolumeTier::Meta,
            })
    }
}

impl MetricsSubsystem for BonusSubsystem {
    fn name(&self) -> &'static str {
        "bonus"
    }

    fn update(
        &mut self,
        _ctx: &RunContext,
        _dataset: &Dataset,
        report: &mut DashboardReport,
    ) -> InsightResult<Vec<InsightEvent>> {
        let Some(recon) = report.reconciliation.as_ref() else {
            log::warn!("bonus: no reconciliation section, skipping");
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        for row in recon.by_salesperson.iter().filter(|r| r.product_tag != ProductTag::Other) {
            let attainment_pct = recon
                .performance
                .iter()
                .find(|p| p.salesperson == row.key && p.product_tag == row.product_tag)
                .and_then(|p| p.attainment_pct);

            let tier = self.tier_for(&row.key, attainment_pct);
            let perm = permanencia_multiplier(&self.tables, row.product_tag, row.adimplencia_pct);
            let meta = meta_bonus(&self.tables, tier);
            let base = self.tables.base_value.get(&row.product_tag).copied().unwrap_or(0.0);

            lines.push(BonusLine {
                salesperson: row.key.clone(),
                product_tag: row.product_tag,
                adimplencia_pct: row.adimplencia_pct,
                permanencia_multiplier_pct: perm,
                attainment_pct,
                volume_tier: tier,
                meta_bonus_pct: meta,
                base_value: base,
                bonus_value: compose(base, perm, meta),
            });
        }

        let events = lines
            .iter()
            .map(|l| InsightEvent::BonusComputed {
                salesperson: l.salesperson.clone(),
                product_tag: l.product_tag,
                bonus_value: l.bonus_value,
            })
            .collect();

        let total_bonus = round2(lines.iter().map(|l| l.bonus_value).sum());
        log::debug!("bonus: {} lines, total {total_bonus:.2}", lines.len());

        report.bonus = Some(BonusReport { lines, total_bonus });
        Ok(events)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
