//! Typed entities produced by the normalizer and consumed by every subsystem.
//!
//! RULE: Records are plain data. Relationships between them (proposal id,
//! client code) are resolved by string matching inside the subsystems;
//! nothing here enforces referential integrity.

use crate::types::{ClientCode, MonthKey, OrderId, ProposalId};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Service orders ─────────────────────────────────────────────────

/// Network family an order belongs to. Reopenings only pair within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Tv,
    BandaLarga,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Finalizada,
    EmAndamento,
    Pendente,
    Cancelada,
}

impl OrderStatus {
    /// Map the free-text status column of the orders sheet.
    pub fn from_text(text: &str) -> Self {
        let upper = text.trim().to_uppercase();
        if upper.contains("CANCEL") {
            OrderStatus::Cancelada
        } else if upper.contains("FINALIZ")
            || upper.contains("EXECUTAD")
            || upper.contains("CONCLU")
            || upper.contains("FECHAD")
            || upper.contains("ENCERRAD")
        {
            OrderStatus::Finalizada
        } else if upper.contains("ANDAMENTO") || upper.contains("EXECU") {
            OrderStatus::EmAndamento
        } else {
            OrderStatus::Pendente
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub order_id:     OrderId,
    pub client_code:  ClientCode,
    pub technician:   String,
    pub city:         String,
    /// Subtype after the FIBRA rewrite ("Corretiva BL", "Ponto Principal", ...).
    pub service_type: String,
    pub package:      String,
    pub status:       OrderStatus,
    pub created_at:   NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub category:     ServiceCategory,
}

impl ServiceOrder {
    pub fn is_finished(&self) -> bool {
        self.status == OrderStatus::Finalizada
    }

    /// A completion date is enough to stand as a reopening's original,
    /// whatever the status column says.
    pub fn can_be_original(&self) -> bool {
        self.completed_at.is_some() || self.is_finished()
    }

    /// Completion time, or creation time for orders closed without one.
    pub fn closed_at(&self) -> NaiveDateTime {
        self.completed_at.unwrap_or(self.created_at)
    }
}

// ── Sales ──────────────────────────────────────────────────────────

/// Product-line tag a sale is bucketed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductTag {
    #[serde(rename = "POS")]
    Pos,
    #[serde(rename = "BL-DGO")]
    BlDgo,
    #[serde(rename = "OUTROS")]
    Other,
}

impl ProductTag {
    pub fn label(&self) -> &'static str {
        match self {
            ProductTag::Pos   => "POS",
            ProductTag::BlDgo => "BL-DGO",
            ProductTag::Other => "OUTROS",
        }
    }

    /// Parse a tag as typed in the targets sheet or on the command line.
    pub fn from_label(text: &str) -> Option<Self> {
        match text.trim().to_uppercase().replace('_', "-").as_str() {
            "POS"                              => Some(ProductTag::Pos),
            "BL-DGO" | "BLDGO" | "BL" | "DGO"  => Some(ProductTag::BlDgo),
            "OUTROS" | "OTHER"                 => Some(ProductTag::Other),
            _                                  => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleSituation {
    Habilitada,
    Pendente,
    Cancelada,
}

impl SaleSituation {
    pub fn from_text(text: &str) -> Self {
        let upper = text.trim().to_uppercase();
        if upper.contains("CANCEL") || upper.contains("INATIV") || upper.contains("DESATIV") {
            SaleSituation::Cancelada
        } else if upper.contains("HABILITAD") || upper.contains("ATIV") || upper.contains("INSTALAD") {
            SaleSituation::Habilitada
        } else {
            SaleSituation::Pendente
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub proposal_id:      ProposalId,
    pub salesperson:      String,
    pub city:             String,
    pub product_grouping: String,
    pub product_tag:      ProductTag,
    pub sale_date:        NaiveDate,
    pub activation_date:  Option<NaiveDate>,
    pub situation:        SaleSituation,
}

impl Sale {
    /// Activation date, or the sale date when the sale was never enabled.
    pub fn anchor_date(&self) -> NaiveDate {
        self.activation_date.unwrap_or(self.sale_date)
    }
}

// ── First payments ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub proposal_id:    ProposalId,
    /// Collection step (`passo`). Empty or "0" means nothing is owed.
    pub step_code:      String,
    /// Date the current collection step was reached (`data_passo_cobranca`).
    pub billing_date:   Option<NaiveDate>,
    /// Package status code (`status_pacote`).
    pub package_status: String,
    pub due_date:       Option<NaiveDate>,
}

// ── Targets and subscriber base ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub salesperson: String,
    pub month:       MonthKey,
    pub product_tag: ProductTag,
    pub quantity:    u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseData {
    pub month:       MonthKey,
    pub city:        Option<String>,
    pub subscribers: u64,
}

// ── Dataset ────────────────────────────────────────────────────────

/// Everything imported for one report run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub service_orders: Vec<ServiceOrder>,
    pub sales:          Vec<Sale>,
    pub payments:       Vec<Payment>,
    pub targets:        Vec<Target>,
    pub base:           Vec<BaseData>,
}

// ── Date helpers ───────────────────────────────────────────────────

pub fn month_key(date: NaiveDate) -> MonthKey {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Month key `months` after the month of `date`.
pub fn month_key_after(date: NaiveDate, months: u32) -> MonthKey {
    let first = date.with_day(1).unwrap_or(date);
    let shifted = first.checked_add_months(Months::new(months)).unwrap_or(first);
    month_key(shifted)
}

/// Percentage with a zero-denominator guard, rounded to two decimals.
pub fn pct(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 * 100.0 / denominator as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
