use crate::{bonus_subsystem::VolumeTier, record::ProductTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Payment classification ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRules {
    pub cancel_codes: Vec<String>,
    pub suspension_codes: Vec<String>,
    pub inclusion_codes: Vec<String>,
    pub paid_steps: Vec<String>,
    /// Lowest numeric step that counts as an open collection.
    pub delinquent_step: u32,
    /// Months after activation at which permanência is measured.
    pub permanencia_months: u32,
}

// ── Bonus tables ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanenciaTier {
    pub min_pct: f64,
    pub multiplier_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeThresholds {
    pub parcial_min_pct: f64,
    pub meta_min_pct: f64,
    pub supermeta_min_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusTables {
    pub base_value: BTreeMap<ProductTag, f64>,
    pub permanencia: BTreeMap<ProductTag, Vec<PermanenciaTier>>,
    pub volume_thresholds: VolumeThresholds,
    pub meta_bonus: BTreeMap<VolumeTier, f64>,
}

// ── SLA goals ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaGoals {
    /// Goal in hours per service type, keyed by the rewritten subtype.
    pub goals: BTreeMap<String, f64>,
    pub fallback_hours: f64,
}

impl SlaGoals {
    pub fn goal_for(&self, service_type: &str) -> f64 {
        self.goals
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(service_type.trim()))
            .map(|(_, v)| *v)
            .unwrap_or(self.fallback_hours)
    }
}

// ── Reopening rules ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReopeningRules {
    pub reopening_types: Vec<String>,
    pub window_days: i64,
}

impl ReopeningRules {
    pub fn is_reopening_type(&self, service_type: &str) -> bool {
        self.reopening_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(service_type.trim()))
    }
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub classification: ClassificationRules,
    pub bonus: BonusTables,
    pub sla: SlaGoals,
    pub reopening: ReopeningRules,
}

impl MetricsConfig {
    /// Load from the data/ directory.
    /// In tests, use MetricsConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let classification_path = format!("{data_dir}/rules/classification.json");
        let classification_content = std::fs::read_to_string(&classification_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {classification_path}: {e}"))?;
        let classification: ClassificationRules = serde_json::from_str(&classification_content)?;

        let bonus_path = format!("{data_dir}/bonus/bonus_tables.json");
        let bonus_content = std::fs::read_to_string(&bonus_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {bonus_path}: {e}"))?;
        let bonus: BonusTables = serde_json::from_str(&bonus_content)?;

        let sla_path = format!("{data_dir}/sla/sla_goals.json");
        let sla_content = std::fs::read_to_string(&sla_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {sla_path}: {e}"))?;
        let sla: SlaGoals = serde_json::from_str(&sla_content)?;

        let reopening_path = format!("{data_dir}/reopening/reopening_rules.json");
        let reopening_content = std::fs::read_to_string(&reopening_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {reopening_path}: {e}"))?;
        let reopening: ReopeningRules = serde_json::from_str(&reopening_content)?;

        let config = Self { classification, bonus, sla, reopening };
        config.validate()?;
        Ok(config)
    }

    /// Reject tables that would make the lookups ambiguous.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (tag, tiers) in &self.bonus.permanencia {
            if tiers.windows(2).any(|w| w[0].min_pct >= w[1].min_pct) {
                anyhow::bail!(
                    "permanência tiers for {} must be sorted by ascending min_pct",
                    tag.label()
                );
            }
        }
        let v = &self.bonus.volume_thresholds;
        if !(v.parcial_min_pct < v.meta_min_pct && v.meta_min_pct < v.supermeta_min_pct) {
            anyhow::bail!("volume thresholds must be strictly increasing");
        }
        if self.reopening.window_days <= 0 {
            anyhow::bail!("reopening window must be positive");
        }
        Ok(())
    }

    /// Same tables as the shipped data/ files, built in code.
    pub fn default_test() -> Self {
        fn codes(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        let classification = ClassificationRules {
            cancel_codes: codes(&["C", "CA", "CANCELADO"]),
            suspension_codes: codes(&["S", "SU", "SUSPENSO"]),
            inclusion_codes: codes(&["I", "INCLUSAO"]),
            paid_steps: codes(&["0"]),
            delinquent_step: 1,
            permanencia_months: 4,
        };

        let tier = |min_pct: f64, multiplier_pct: f64| PermanenciaTier { min_pct, multiplier_pct };

        let bonus = BonusTables {
            base_value: [
                (ProductTag::Pos, 30.0),
                (ProductTag::BlDgo, 45.0),
                (ProductTag::Other, 0.0),
            ]
            .into(),
            permanencia: [
                (
                    ProductTag::Pos,
                    vec![tier(60.0, 50.0), tier(70.0, 80.0), tier(80.0, 100.0), tier(90.0, 120.0)],
                ),
                (
                    ProductTag::BlDgo,
                    vec![tier(50.0, 50.0), tier(65.0, 80.0), tier(75.0, 100.0), tier(85.0, 120.0)],
                ),
            ]
            .into(),
            volume_thresholds: VolumeThresholds {
                parcial_min_pct: 80.0,
                meta_min_pct: 100.0,
                supermeta_min_pct: 120.0,
            },
            meta_bonus: [
                (VolumeTier::Abaixo, 0.0),
                (VolumeTier::Parcial, 70.0),
                (VolumeTier::Meta, 100.0),
                (VolumeTier::Supermeta, 130.0),
            ]
            .into(),
        };

        let sla = SlaGoals {
            goals: [
                ("Corretiva".to_string(), 48.0),
                ("Corretiva BL".to_string(), 24.0),
                ("Ponto Principal".to_string(), 72.0),
                ("Ponto Principal BL".to_string(), 48.0),
            ]
            .into(),
            fallback_hours: 48.0,
        };

        let reopening = ReopeningRules {
            reopening_types: codes(&["Corretiva", "Corretiva BL"]),
            window_days: 30,
        };

        Self { classification, bonus, sla, reopening }
    }
}
