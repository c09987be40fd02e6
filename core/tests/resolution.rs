//! Integration tests for time-to-resolution against SLA goals.

use chrono::{NaiveDate, NaiveDateTime};
use insight_core::{
    config::MetricsConfig,
    normalizer::service_category,
    record::{OrderStatus, ServiceOrder},
    resolution_subsystem::{resolution_hours, resolution_report},
};

fn at(d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap().and_hms_opt(h, min, 0).unwrap()
}

fn order(id: &str, tech: &str, subtype: &str, created: NaiveDateTime, completed: Option<NaiveDateTime>) -> ServiceOrder {
    ServiceOrder {
        order_id: id.into(),
        client_code: "C1".into(),
        technician: tech.into(),
        city: "Goiânia".into(),
        service_type: subtype.into(),
        package: String::new(),
        status: OrderStatus::Finalizada,
        created_at: created,
        completed_at: completed,
        category: service_category(subtype),
    }
}

#[test]
fn hours_are_measured_to_the_minute() {
    let o = order("OS1", "CARLOS", "Corretiva", at(1, 8, 0), Some(at(2, 8, 30)));
    assert_eq!(resolution_hours(&o), Some(24.5));
}

#[test]
fn unfinished_orders_are_not_measured() {
    let mut o = order("OS1", "CARLOS", "Corretiva", at(1, 8, 0), Some(at(2, 8, 0)));
    o.status = OrderStatus::EmAndamento;
    assert_eq!(resolution_hours(&o), None);

    let no_completion = order("OS2", "CARLOS", "Corretiva", at(1, 8, 0), None);
    assert_eq!(resolution_hours(&no_completion), None);
}

#[test]
fn goals_are_per_service_type() {
    let goals = MetricsConfig::default_test().sla;
    let orders = vec![
        order("OS1", "CARLOS", "Corretiva BL", at(1, 8, 0), Some(at(2, 4, 0))),
        order("OS2", "DIEGO", "Corretiva BL", at(1, 8, 0), Some(at(2, 14, 0))),
        order("OS3", "CARLOS", "Corretiva", at(1, 8, 0), Some(at(2, 14, 0))),
        order("OS4", "DIEGO", "Instalação", at(1, 8, 0), Some(at(3, 10, 0))),
    ];
    let report = resolution_report(&orders, &goals);

    let bl = report.by_service_type.iter().find(|r| r.key == "Corretiva BL").unwrap();
    assert_eq!(bl.orders, 2);
    assert_eq!(bl.goal_hours, Some(24.0));
    assert_eq!(bl.within_goal, 1);
    assert_eq!(bl.within_goal_pct, 50.0);
    assert_eq!(bl.avg_hours, 25.0);

    let tv = report.by_service_type.iter().find(|r| r.key == "Corretiva").unwrap();
    assert_eq!(tv.goal_hours, Some(48.0));
    assert_eq!(tv.within_goal, 1);

    let install = report.by_service_type.iter().find(|r| r.key == "Instalação").unwrap();
    assert_eq!(install.goal_hours, Some(48.0));
    assert_eq!(install.within_goal, 0);

    let carlos = report.by_technician.iter().find(|r| r.key == "CARLOS").unwrap();
    assert_eq!(carlos.goal_hours, None);
    assert_eq!(carlos.within_goal_pct, 100.0);

    assert_eq!(report.measured_orders, 4);
    assert_eq!(report.within_goal, 2);
    assert_eq!(report.within_goal_pct, 50.0);
}

#[test]
fn negative_spans_are_reported_and_excluded() {
    let goals = MetricsConfig::default_test().sla;
    let orders = vec![
        order("OS1", "CARLOS", "Corretiva", at(2, 8, 0), Some(at(2, 20, 0))),
        order("OS2", "CARLOS", "Corretiva", at(5, 8, 0), Some(at(4, 8, 0))),
    ];
    let report = resolution_report(&orders, &goals);

    assert_eq!(report.invalid_spans, vec!["OS2".to_string()]);
    assert_eq!(report.measured_orders, 1);
    assert_eq!(report.avg_hours, 12.0);
}

#[test]
fn no_orders_gives_zeroes() {
    let goals = MetricsConfig::default_test().sla;
    let report = resolution_report(&[], &goals);
    assert_eq!(report.measured_orders, 0);
    assert_eq!(report.avg_hours, 0.0);
    assert_eq!(report.within_goal_pct, 0.0);
    assert!(report.by_service_type.is_empty());
}
