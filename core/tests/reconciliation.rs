//! Integration tests for sales × first-payment reconciliation.
//!
//! Tests verify:
//! 1. Duplicate payments collapse to the latest billing date
//! 2. adimplência leaves inclusões out of the denominator
//! 3. Permanência periods are anchored on activation, else sale date
//! 4. Period trends carry the change against the previous period
//! 5. Attainment is enabled sales over summed targets
//! 6. Proposals join across spellings; unsold payments are orphans

use chrono::NaiveDate;
use insight_core::{
    config::MetricsConfig,
    payment_classifier::CustomerStatus,
    reconciliation_subsystem::{
        index_payments, orphan_payments, period_trend, permanencia_period, reconcile,
        salesperson_performance, summarize, totals, GroupBy,
    },
    record::{Payment, ProductTag, Sale, SaleSituation, Target},
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn sale(id: &str, seller: &str, city: &str, tag: ProductTag, sold: NaiveDate) -> Sale {
    Sale {
        proposal_id: id.into(),
        salesperson: seller.into(),
        city: city.into(),
        product_grouping: tag.label().into(),
        product_tag: tag,
        sale_date: sold,
        activation_date: Some(sold),
        situation: SaleSituation::Habilitada,
    }
}

fn payment(id: &str, step: &str, status: &str, billed: Option<NaiveDate>) -> Payment {
    Payment {
        proposal_id: id.into(),
        step_code: step.into(),
        billing_date: billed,
        package_status: status.into(),
        due_date: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment index
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn duplicate_payments_keep_the_latest_billing_date() {
    let payments = vec![
        payment("0042", "0", "A", Some(day(2024, 3, 5))),
        payment("42", "2", "A", Some(day(2024, 3, 1))),
        payment("43", "0", "A", None),
    ];
    let (index, duplicates) = index_payments(&payments);

    assert_eq!(index.len(), 2);
    assert_eq!(index["42"].step_code, "0");
    assert_eq!(duplicates, vec![("42".to_string(), 2)]);
}

#[test]
fn equal_billing_dates_keep_the_last_row() {
    let payments = vec![
        payment("7", "2", "A", Some(day(2024, 3, 1))),
        payment("7", "0", "A", Some(day(2024, 3, 1))),
    ];
    let (index, _) = index_payments(&payments);
    assert_eq!(index["7"].step_code, "0");
}

#[test]
fn proposals_join_across_spellings() {
    let rules = MetricsConfig::default_test().classification;
    let jan = day(2024, 1, 10);
    let sales = vec![
        sale("000101", "ANA", "Goiânia", ProductTag::Pos, jan),
        sale("102.0", "ANA", "Goiânia", ProductTag::Pos, jan),
        sale("103", "ANA", "Goiânia", ProductTag::Pos, jan),
    ];
    let payments = vec![
        payment("101.0", "0", "A", Some(day(2024, 2, 1))),
        payment("0102", "2", "A", Some(day(2024, 2, 1))),
        payment("00999", "0", "A", None),
        payment("998.0", "0", "A", None),
    ];

    let rows = reconcile(&sales, &payments, day(2024, 3, 31), &rules);
    assert_eq!(rows[0].classification.status, CustomerStatus::Adimplente);
    assert_eq!(rows[0].payment.as_ref().unwrap().proposal_id, "101.0");
    assert_eq!(rows[1].classification.status, CustomerStatus::Inadimplente);
    assert!(rows[2].payment.is_none());

    assert_eq!(orphan_payments(&sales, &payments), vec!["998".to_string(), "999".to_string()]);
    assert!(orphan_payments(&sales, &payments[..2]).is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Status counts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn inclusions_stay_out_of_the_denominator() {
    let rules = MetricsConfig::default_test().classification;
    let jan = day(2024, 1, 10);
    let sales = vec![
        sale("1", "ANA", "Goiânia", ProductTag::Pos, jan),
        sale("2", "ANA", "Goiânia", ProductTag::Pos, jan),
        sale("3", "ANA", "Anápolis", ProductTag::Pos, jan),
        sale("4", "ANA", "Anápolis", ProductTag::Pos, jan),
    ];
    let payments = vec![
        payment("1", "0", "A", Some(day(2024, 2, 1))),
        payment("2", "2", "A", Some(day(2024, 2, 1))),
        payment("3", "", "C", None),
    ];

    let rows = reconcile(&sales, &payments, day(2024, 3, 31), &rules);
    let statuses: Vec<_> = rows.iter().map(|r| r.classification.status).collect();
    assert_eq!(
        statuses,
        vec![
            CustomerStatus::Adimplente,
            CustomerStatus::Inadimplente,
            CustomerStatus::Cancelado,
            CustomerStatus::Inclusao,
        ]
    );
    assert!(rows[3].payment.is_none());

    let t = totals(&rows);
    assert_eq!(t.len(), 1);
    assert_eq!(t[0].counts.total, 4);
    assert_eq!(t[0].counts.measured(), 3);
    assert_eq!(t[0].adimplencia_pct, 33.33);
    assert_eq!(t[0].inadimplencia_pct, 33.33);
    assert_eq!(t[0].cancelamento_pct, 33.33);

    let by_city = summarize(&rows, GroupBy::City);
    let anapolis = by_city.iter().find(|r| r.key == "Anápolis").unwrap();
    assert_eq!(anapolis.counts.cancelados, 1);
    assert_eq!(anapolis.counts.inclusoes, 1);
    assert_eq!(anapolis.adimplencia_pct, 0.0);
    let goiania = by_city.iter().find(|r| r.key == "Goiânia").unwrap();
    assert_eq!(goiania.adimplencia_pct, 50.0);
}

#[test]
fn bl_dgo_without_payment_counts_as_current_inclusion() {
    let rules = MetricsConfig::default_test().classification;
    let sales = vec![sale("9", "ANA", "Goiânia", ProductTag::BlDgo, day(2024, 1, 10))];
    let rows = reconcile(&sales, &[], day(2024, 3, 31), &rules);

    let t = totals(&rows);
    assert_eq!(t[0].counts.adimplentes, 1);
    assert_eq!(t[0].counts.adimplentes_inclusao, 1);
    assert_eq!(t[0].adimplencia_pct, 100.0);
}

#[test]
fn empty_group_has_zero_rate() {
    let rules = MetricsConfig::default_test().classification;
    let sales = vec![sale("1", "ANA", "Goiânia", ProductTag::Pos, day(2024, 1, 10))];
    let rows = reconcile(&sales, &[], day(2024, 3, 31), &rules);
    let t = totals(&rows);
    assert_eq!(t[0].counts.measured(), 0);
    assert_eq!(t[0].adimplencia_pct, 0.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Periods
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn permanencia_period_is_four_months_after_the_anchor() {
    let mut s = sale("1", "ANA", "Goiânia", ProductTag::Pos, day(2023, 11, 5));
    s.activation_date = Some(day(2024, 1, 31));
    assert_eq!(permanencia_period(&s, 4), "2024-05");

    s.activation_date = None;
    assert_eq!(permanencia_period(&s, 4), "2024-03");
}

#[test]
fn trend_reports_point_change_between_periods() {
    let rules = MetricsConfig::default_test().classification;
    let sales = vec![
        sale("1", "ANA", "Goiânia", ProductTag::Pos, day(2024, 1, 10)),
        sale("2", "ANA", "Goiânia", ProductTag::Pos, day(2024, 1, 12)),
        sale("3", "ANA", "Goiânia", ProductTag::Pos, day(2024, 2, 10)),
        sale("4", "ANA", "Goiânia", ProductTag::BlDgo, day(2024, 2, 10)),
    ];
    let payments = vec![
        payment("1", "0", "A", None),
        payment("2", "1", "A", Some(day(2024, 2, 1))),
        payment("3", "0", "A", None),
    ];
    let rows = reconcile(&sales, &payments, day(2024, 6, 30), &rules);

    let trend = period_trend(&rows, ProductTag::Pos);
    assert_eq!(trend.len(), 2);
    assert_eq!(trend[0].period, "2024-05");
    assert_eq!(trend[0].adimplencia_pct, 50.0);
    assert_eq!(trend[0].delta_pp, None);
    assert_eq!(trend[1].period, "2024-06");
    assert_eq!(trend[1].adimplencia_pct, 100.0);
    assert_eq!(trend[1].delta_pp, Some(50.0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Volume
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn attainment_counts_enabled_sales_against_summed_targets() {
    let rules = MetricsConfig::default_test().classification;
    let jan = day(2024, 1, 10);
    let mut pending = sale("3", "ANA", "Goiânia", ProductTag::Pos, jan);
    pending.situation = SaleSituation::Pendente;
    let sales = vec![
        sale("1", "ANA", "Goiânia", ProductTag::Pos, jan),
        sale("2", "ANA", "Goiânia", ProductTag::Pos, jan),
        pending,
        sale("4", "BRUNO", "Goiânia", ProductTag::Pos, jan),
    ];
    let targets = vec![
        Target { salesperson: "ana".into(), month: "2024-01".into(), product_tag: ProductTag::Pos, quantity: 1 },
        Target { salesperson: "ANA ".into(), month: "2024-02".into(), product_tag: ProductTag::Pos, quantity: 1 },
    ];
    let rows = reconcile(&sales, &[], jan, &rules);
    let perf = salesperson_performance(&rows, &targets);

    let ana = perf.iter().find(|p| p.salesperson == "ANA").unwrap();
    assert_eq!(ana.total_sales, 3);
    assert_eq!(ana.enabled_sales, 2);
    assert_eq!(ana.conversion_pct, 66.67);
    assert_eq!(ana.target, Some(2));
    assert_eq!(ana.attainment_pct, Some(100.0));

    let bruno = perf.iter().find(|p| p.salesperson == "BRUNO").unwrap();
    assert_eq!(bruno.target, None);
    assert_eq!(bruno.attainment_pct, None);
}
