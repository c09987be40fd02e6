//! Record normalizer: raw spreadsheet rows to typed entities.
//!
//! Column headers arrive in whatever spelling the export tool produced
//! ("Código OS", "CODIGO_OS", "Nº Proposta"). Headers are folded with
//! `normalize_header` and then looked up through per-field alias lists.
//!
//! RULE: One bad row never aborts an import. Rows missing their key or a
//! mandatory date land in `Normalized::rejected` with their sheet line.

use crate::{
    import::SheetKind,
    record::{
        month_key, BaseData, OrderStatus, Payment, ProductTag, Sale, SaleSituation,
        ServiceCategory, ServiceOrder, Target,
    },
    types::{MonthKey, NOT_INFORMED},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One spreadsheet row: normalized header → cell text.
pub type RawRow = BTreeMap<String, String>;

/// Key under which the reader records a row's sheet line. Folded headers
/// never start with `_`, so it cannot collide with a column.
pub const LINE_KEY: &str = "_line";

/// Subtypes that get a " BL" suffix when the package is a fiber package.
const FIBER_REWRITE_SUBTYPES: [&str; 2] = ["Corretiva", "Ponto Principal"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based sheet line (the header is line 1).
    pub line:   usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalized<T> {
    pub records:  Vec<T>,
    pub rejected: Vec<RejectedRow>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self { records: Vec::new(), rejected: Vec::new() }
    }
}

impl<T> Normalized<T> {
    /// Rows built by hand carry no line; assume header plus one row per index.
    fn reject(&mut self, row: &RawRow, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        let line = row
            .get(LINE_KEY)
            .and_then(|l| l.parse().ok())
            .unwrap_or(index + 2);
        log::warn!("row {line} rejected: {reason}");
        self.rejected.push(RejectedRow { line, reason });
    }
}

// ── Column aliases ─────────────────────────────────────────────────

const ORDER_ID: &[&str] = &["codigo_os", "cod_os", "numero_os", "os", "ordem_servico", "id_os"];
const CLIENT_CODE: &[&str] = &["codigo_cliente", "cod_cliente", "cliente", "contrato"];
const TECHNICIAN: &[&str] = &["tecnico", "nome_tecnico", "tecnico_responsavel"];
const CITY: &[&str] = &["cidade", "municipio"];
const SUBTYPE: &[&str] = &["subtipo", "subtipo_servico", "tipo_servico", "tipo"];
const PACKAGE: &[&str] = &["pacote", "nome_pacote", "plano"];
const ORDER_STATUS: &[&str] = &["status", "status_os", "situacao"];
const CREATED_AT: &[&str] = &["data_criacao", "data_abertura", "criacao", "data_cadastro"];
const COMPLETED_AT: &[&str] = &["data_finalizacao", "data_conclusao", "data_fechamento", "finalizacao"];

const PROPOSAL: &[&str] = &["numero_proposta", "proposta", "n_proposta", "num_proposta"];
const SALESPERSON: &[&str] = &["vendedor", "consultor", "nome_vendedor"];
const GROUPING: &[&str] = &["agrupamento_produto", "agrupamento", "grupo_produto", "produto"];
const SALE_DATE: &[&str] = &["data_venda", "data_cadastro", "data"];
const ACTIVATION_DATE: &[&str] = &["data_habilitacao", "habilitacao", "data_ativacao"];
const SALE_SITUATION: &[&str] = &["situacao", "status_proposta", "status"];

const STEP_CODE: &[&str] = &["passo", "codigo_passo", "cod_passo"];
const BILLING_DATE: &[&str] = &["data_passo_cobranca", "data_cobranca", "data_passo"];
const PACKAGE_STATUS: &[&str] = &["status_pacote", "cod_status_pacote", "status"];
const DUE_DATE: &[&str] = &["vencimento", "data_vencimento", "vencimento_fatura"];

const MONTH: &[&str] = &["mes", "competencia", "periodo", "mes_referencia"];
const TAG: &[&str] = &["linha", "tag", "produto", "agrupamento"];
const TARGET_QTY: &[&str] = &["meta", "quantidade", "qtd_meta"];
const SUBSCRIBERS: &[&str] = &["assinantes", "base", "quantidade", "total"];

/// Column a sheet cannot be read without, with its aliases.
fn key_column(sheet: SheetKind) -> (&'static str, &'static [&'static str]) {
    match sheet {
        SheetKind::ServiceOrders => ("codigo_os", ORDER_ID),
        SheetKind::Sales         => ("numero_proposta", PROPOSAL),
        SheetKind::Payments      => ("numero_proposta", PROPOSAL),
        SheetKind::Targets       => ("vendedor", SALESPERSON),
        SheetKind::Base          => ("mes", MONTH),
    }
}

/// Name of the key column when no header of a non-empty sheet matches it.
pub fn missing_key_column(sheet: SheetKind, rows: &[RawRow]) -> Option<&'static str> {
    let (name, aliases) = key_column(sheet);
    let present = rows.iter().any(|r| aliases.iter().any(|a| r.contains_key(*a)));
    (!rows.is_empty() && !present).then_some(name)
}

fn field<'a>(row: &'a RawRow, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|a| row.get(*a))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

fn text_or_default(row: &RawRow, aliases: &[&str]) -> String {
    field(row, aliases).unwrap_or(NOT_INFORMED).to_string()
}

// ── Scalar parsing ─────────────────────────────────────────────────

/// Lowercase and strip Portuguese accents: "Inclusão" → "inclusao".
pub fn fold_accents(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Fold a header into `snake_case` ASCII: "Código OS" → "codigo_os".
pub fn normalize_header(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for folded in fold_accents(name.trim()).chars() {
        if folded.is_ascii_alphanumeric() {
            out.push(folded);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Proposal numbers are typed by hand and re-exported through Excel:
/// "000123", "123" and "123.0" are the same proposal.
pub fn normalize_proposal(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_float = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    let stripped = without_float.trim_start_matches('0');
    if stripped.is_empty() && !without_float.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

const DATETIME_FORMATS: [&str; 7] = [
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%y %H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%y"];

/// Excel stores dates as days since 1899-12-30; the fraction is the time.
fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    Some(epoch + Duration::days(days) + Duration::seconds(seconds))
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if !t.contains(['/', '-', ':']) {
        return t.replace(',', ".").parse::<f64>().ok().and_then(from_excel_serial);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(t, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(t, f).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    parse_datetime(text).map(|dt| dt.date())
}

/// Accepts "2024-03", "03/2024" or any full date.
pub fn parse_month(text: &str) -> Option<MonthKey> {
    let t = text.trim();
    if let Some((m, y)) = t.split_once('/') {
        if !y.contains('/') {
            let month: u32 = m.trim().parse().ok()?;
            let year: i32 = y.trim().parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, 1).map(month_key);
        }
    }
    if t.len() == 7 && t.as_bytes().get(4) == Some(&b'-') {
        return NaiveDate::parse_from_str(&format!("{t}-01"), "%Y-%m-%d").ok().map(month_key);
    }
    parse_date(t).map(month_key)
}

/// pt-BR counts: "1.234" is one thousand two hundred thirty-four, "12,0" is
/// twelve. A lone `.` not followed by three digits is Excel's decimal point
/// ("10.0").
pub fn parse_count(text: &str) -> Option<u64> {
    let t = text.trim().replace(' ', "");
    let cleaned = if t.contains(',') {
        t.replace('.', "").replace(',', ".")
    } else {
        match t.split_once('.') {
            Some((_, frac)) if !frac.contains('.') && frac.len() != 3 => t.clone(),
            _ => t.replace('.', ""),
        }
    };
    let value: f64 = cleaned.parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some(value.round() as u64)
}

// ── Domain rules ───────────────────────────────────────────────────

/// "Corretiva" on a FIBRA package becomes "Corretiva BL".
pub fn rewrite_subtype(subtype: &str, package: &str) -> String {
    let base = subtype.trim();
    let is_fiber = package.to_uppercase().contains("FIBRA");
    if is_fiber && FIBER_REWRITE_SUBTYPES.iter().any(|s| s.eq_ignore_ascii_case(base)) {
        format!("{base} BL")
    } else {
        base.to_string()
    }
}

pub fn service_category(subtype: &str) -> ServiceCategory {
    if subtype.trim().to_uppercase().ends_with(" BL") {
        ServiceCategory::BandaLarga
    } else {
        ServiceCategory::Tv
    }
}

pub fn product_tag(grouping: &str) -> ProductTag {
    let upper = grouping.to_uppercase();
    if upper.contains("POS") || upper.contains("PÓS") {
        ProductTag::Pos
    } else if upper.contains("BL") || upper.contains("DGO") || upper.contains("FIBRA") {
        ProductTag::BlDgo
    } else {
        ProductTag::Other
    }
}

// ── Sheet normalizers ──────────────────────────────────────────────

pub fn normalize_service_orders(rows: &[RawRow]) -> Normalized<ServiceOrder> {
    let mut out = Normalized::default();
    for (i, row) in rows.iter().enumerate() {
        let Some(order_id) = field(row, ORDER_ID) else {
            out.reject(row, i, "missing order id");
            continue;
        };
        let Some(created_at) = field(row, CREATED_AT).and_then(parse_datetime) else {
            out.reject(row, i, format!("order {order_id}: missing or invalid creation date"));
            continue;
        };
        let package = field(row, PACKAGE).unwrap_or_default().to_string();
        let service_type = rewrite_subtype(field(row, SUBTYPE).unwrap_or_default(), &package);
        out.records.push(ServiceOrder {
            order_id: order_id.to_string(),
            client_code: field(row, CLIENT_CODE).unwrap_or_default().to_string(),
            technician: text_or_default(row, TECHNICIAN),
            city: text_or_default(row, CITY),
            category: service_category(&service_type),
            service_type,
            package,
            status: OrderStatus::from_text(field(row, ORDER_STATUS).unwrap_or("PENDENTE")),
            created_at,
            completed_at: field(row, COMPLETED_AT).and_then(parse_datetime),
        });
    }
    out
}

pub fn normalize_sales(rows: &[RawRow]) -> Normalized<Sale> {
    let mut out = Normalized::default();
    for (i, row) in rows.iter().enumerate() {
        let Some(proposal) = field(row, PROPOSAL).map(normalize_proposal) else {
            out.reject(row, i, "missing proposal number");
            continue;
        };
        let Some(sale_date) = field(row, SALE_DATE).and_then(parse_date) else {
            out.reject(row, i, format!("proposal {proposal}: missing or invalid sale date"));
            continue;
        };
        let grouping = field(row, GROUPING).unwrap_or_default().to_string();
        out.records.push(Sale {
            proposal_id: proposal,
            salesperson: text_or_default(row, SALESPERSON),
            city: text_or_default(row, CITY),
            product_tag: product_tag(&grouping),
            product_grouping: grouping,
            sale_date,
            activation_date: field(row, ACTIVATION_DATE).and_then(parse_date),
            situation: SaleSituation::from_text(field(row, SALE_SITUATION).unwrap_or_default()),
        });
    }
    out
}

pub fn normalize_payments(rows: &[RawRow]) -> Normalized<Payment> {
    let mut out = Normalized::default();
    for (i, row) in rows.iter().enumerate() {
        let Some(proposal) = field(row, PROPOSAL).map(normalize_proposal) else {
            out.reject(row, i, "missing proposal number");
            continue;
        };
        out.records.push(Payment {
            proposal_id: proposal,
            step_code: field(row, STEP_CODE).unwrap_or_default().to_string(),
            billing_date: field(row, BILLING_DATE).and_then(parse_date),
            package_status: field(row, PACKAGE_STATUS).unwrap_or_default().to_string(),
            due_date: field(row, DUE_DATE).and_then(parse_date),
        });
    }
    out
}

pub fn normalize_targets(rows: &[RawRow]) -> Normalized<Target> {
    let mut out = Normalized::default();
    for (i, row) in rows.iter().enumerate() {
        let Some(salesperson) = field(row, SALESPERSON) else {
            out.reject(row, i, "missing salesperson");
            continue;
        };
        let Some(month) = field(row, MONTH).and_then(parse_month) else {
            out.reject(row, i, format!("{salesperson}: missing or invalid month"));
            continue;
        };
        let Some(tag) = field(row, TAG).and_then(ProductTag::from_label) else {
            out.reject(row, i, format!("{salesperson}: unknown product line"));
            continue;
        };
        let Some(quantity) = field(row, TARGET_QTY).and_then(parse_count) else {
            out.reject(row, i, format!("{salesperson}: invalid target quantity"));
            continue;
        };
        out.records.push(Target {
            salesperson: salesperson.to_string(),
            month,
            product_tag: tag,
            quantity: quantity.min(u32::MAX as u64) as u32,
        });
    }
    out
}

pub fn normalize_base(rows: &[RawRow]) -> Normalized<BaseData> {
    let mut out = Normalized::default();
    for (i, row) in rows.iter().enumerate() {
        let Some(month) = field(row, MONTH).and_then(parse_month) else {
            out.reject(row, i, "missing or invalid month");
            continue;
        };
        let Some(subscribers) = field(row, SUBSCRIBERS).and_then(parse_count) else {
            out.reject(row, i, format!("{month}: invalid subscriber count"));
            continue;
        };
        out.records.push(BaseData {
            month,
            city: field(row, CITY).map(str::to_string),
            subscribers,
        });
    }
    out
}
