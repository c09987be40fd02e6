//! End-to-end tests: CSV import → report run → snapshot and event log.
//!
//! Tests verify:
//! 1. Subsystems are registered in the documented order
//! 2. Imports persist accepted records and rejected rows with events
//! 3. A run fills every section from the latest uploads
//! 4. The event log is ordered and bracketed by run events
//! 5. Reports reload from their snapshot; unknown runs are an error
//! 6. Dashboard filters narrow the dataset before a run, targets included

use chrono::NaiveDate;
use insight_core::{
    bonus_subsystem::VolumeTier,
    engine::InsightEngine,
    error::InsightError,
    event::InsightEvent,
    import::{read_csv_str, SheetKind},
    record::ProductTag,
    report::ReportFilter,
};

const SALES: &str = "\
Número Proposta;Vendedor;Cidade;Agrupamento Produto;Data Venda;Data Habilitação;Situação
000101;ANA SOUZA;Goiânia;POS PAGO;05/01/2024;08/01/2024;HABILITADA
102;ANA SOUZA;Goiânia;POS PAGO;10/01/2024;12/01/2024;HABILITADA
103;ANA SOUZA;Anápolis;BANDA LARGA FIBRA;15/01/2024;;PENDENTE
104;BRUNO LIMA;Anápolis;POS PAGO;20/01/2024;22/01/2024;HABILITADA
105;BRUNO LIMA;Anápolis;POS PAGO;21/01/2024;23/01/2024;HABILITADA
;BRUNO LIMA;Anápolis;POS PAGO;21/01/2024;;HABILITADA
";

const PAYMENTS: &str = "\
Proposta,Passo,Data Passo Cobrança,Status Pacote
101,0,01/02/2024,A
102,0,01/02/2024,A
104,,,C
105,3,10/02/2024,A
";

const TARGETS: &str = "\
Vendedor;Mês;Linha;Meta
ANA SOUZA;01/2024;POS;2
ANA SOUZA;01/2024;BL-DGO;2
";

const ORDERS: &str = "\
Código OS,Código Cliente,Técnico,Cidade,Subtipo,Pacote,Status,Data Criação,Data Finalização
OS1,C1,CARLOS,Goiânia,Ponto Principal,COMBO FIBRA,FINALIZADA,01/03/2024 08:00,01/03/2024 20:00
OS2,C1,DIEGO,Goiânia,Corretiva,COMBO FIBRA,FINALIZADA,10/03/2024 09:00,11/03/2024 15:00
OS3,C2,CARLOS,Anápolis,Corretiva,TV HD,PENDENTE,12/03/2024 10:00,
OS4,C3,DIEGO,Anápolis,Corretiva,TV HD,FINALIZADA,05/03/2024 10:00,04/03/2024 10:00
OS5,,CARLOS,Goiânia,Corretiva,TV HD,FINALIZADA,,
";

const BASE: &str = "\
Mês;Cidade;Assinantes
03/2024;Goiânia;1.000
";

fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Build a test engine with every sheet imported.
fn loaded_engine() -> InsightEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = InsightEngine::build_test().expect("build_test failed");
    for (sheet, text) in [
        (SheetKind::Sales, SALES),
        (SheetKind::Payments, PAYMENTS),
        (SheetKind::Targets, TARGETS),
        (SheetKind::ServiceOrders, ORDERS),
        (SheetKind::Base, BASE),
    ] {
        let rows = read_csv_str(text).unwrap();
        engine.import_sheet(sheet, "fixture", &rows).unwrap();
    }
    engine
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring and imports
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn subsystems_run_in_documented_order() {
    let engine = InsightEngine::build_test().unwrap();
    assert_eq!(
        engine.subsystem_names(),
        vec!["reconciliation", "reopening", "resolution", "bonus"]
    );
}

#[test]
fn import_records_rejections_and_events() {
    let mut engine = InsightEngine::build_test().unwrap();
    let rows = read_csv_str(SALES).unwrap();
    let summary = engine.import_sheet(SheetKind::Sales, "vendas.csv", &rows).unwrap();

    assert_eq!(summary.accepted, 5);
    assert_eq!(summary.rejected, 1);

    let batch = engine.store.latest_batch(SheetKind::Sales).unwrap().unwrap();
    assert_eq!(batch.batch_id, summary.batch_id);
    assert_eq!(batch.source, "vendas.csv");

    let rejected = engine.store.rejected_rows(&summary.batch_id).unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].line, 7);

    assert_eq!(engine.store.event_count(&summary.batch_id, "row_rejected").unwrap(), 1);
    assert_eq!(engine.store.event_count(&summary.batch_id, "import_completed").unwrap(), 1);
}

#[test]
fn latest_upload_replaces_the_previous_one() {
    let mut engine = loaded_engine();
    assert_eq!(engine.dataset().unwrap().sales.len(), 5);

    let rows = read_csv_str(
        "Proposta;Vendedor;Agrupamento;Data Venda\n900;CAIO;POS;01/02/2024\n",
    )
    .unwrap();
    engine.import_sheet(SheetKind::Sales, "vendas-fev.csv", &rows).unwrap();

    let dataset = engine.dataset().unwrap();
    assert_eq!(dataset.sales.len(), 1);
    assert_eq!(dataset.sales[0].proposal_id, "900");
    assert_eq!(dataset.payments.len(), 4);
}

#[test]
fn sheet_without_key_column_is_refused() {
    let mut engine = InsightEngine::build_test().unwrap();
    let rows = read_csv_str("Vendedor;Data Venda\nANA;01/02/2024\n").unwrap();
    let err = engine.import_sheet(SheetKind::Sales, "vendas.csv", &rows).unwrap_err();

    assert!(matches!(err, InsightError::MissingColumn { ref column, .. } if column == "numero_proposta"));
    assert!(engine.store.latest_batch(SheetKind::Sales).unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Runs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn full_run_fills_every_section() {
    let mut engine = loaded_engine();
    let report = engine.run_report(reference(), ReportFilter::default()).unwrap();

    let recon = report.reconciliation.as_ref().unwrap();
    let pos = recon.total_for(ProductTag::Pos).unwrap();
    assert_eq!(pos.counts.total, 4);
    assert_eq!(pos.counts.adimplentes, 2);
    assert_eq!(pos.counts.inadimplentes, 1);
    assert_eq!(pos.counts.cancelados, 1);
    assert_eq!(pos.adimplencia_pct, 50.0);
    let bl = recon.total_for(ProductTag::BlDgo).unwrap();
    assert_eq!(bl.counts.adimplentes_inclusao, 1);
    assert_eq!(recon.unmatched_sales, 1);
    assert_eq!(recon.orphan_payments, 0);
    assert_eq!(recon.salesperson_row("BRUNO LIMA", ProductTag::Pos).unwrap().adimplencia_pct, 0.0);

    let reopening = report.reopening.as_ref().unwrap();
    assert_eq!(reopening.pairs.len(), 1);
    assert_eq!(reopening.pairs[0].original_order_id, "OS1");
    assert_eq!(reopening.pairs[0].technician, "CARLOS");
    assert_eq!(reopening.total_originals, 3);
    assert_eq!(reopening.overall_rate_pct, 33.33);
    assert_eq!(reopening.over_base[0].rate_pct, 0.1);

    let resolution = report.resolution.as_ref().unwrap();
    assert_eq!(resolution.measured_orders, 2);
    assert_eq!(resolution.within_goal, 1);
    assert_eq!(resolution.avg_hours, 21.0);
    assert_eq!(resolution.invalid_spans, vec!["OS4".to_string()]);

    let bonus = report.bonus.as_ref().unwrap();
    assert_eq!(bonus.lines.len(), 3);
    assert!(close(bonus.total_bonus, 36.0));
}

#[test]
fn event_log_is_bracketed_and_sequential() {
    let mut engine = loaded_engine();
    let report = engine.run_report(reference(), ReportFilter::default()).unwrap();
    let entries = engine.events_for_run(&report.run_id).unwrap();

    assert_eq!(entries.first().unwrap().event_type, "run_started");
    assert_eq!(entries.last().unwrap().event_type, "run_completed");
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(e.seq, i as u64, "seq gap at {i}");
    }

    let detected: Vec<InsightEvent> = entries
        .iter()
        .filter(|e| e.event_type == "reopening_detected")
        .map(|e| serde_json::from_str(&e.payload).unwrap())
        .collect();
    assert_eq!(detected.len(), 1);
    assert!(matches!(
        &detected[0],
        InsightEvent::ReopeningDetected { original_order_id, .. } if original_order_id == "OS1"
    ));

    let count = |t: &str| engine.store.event_count(&report.run_id, t).unwrap();
    assert_eq!(count("unmatched_sale"), 1);
    assert_eq!(count("negative_resolution_span"), 1);
    assert_eq!(count("bonus_computed"), 3);
    assert_eq!(count("reconciliation_computed"), 2);
}

#[test]
fn snapshot_reloads_the_same_report() {
    let mut engine = loaded_engine();
    let report = engine.run_report(reference(), ReportFilter::default()).unwrap();

    let run = engine.store.get_run(&report.run_id).unwrap().unwrap();
    assert!(run.completed_at.is_some());
    assert_eq!(run.reference_date, "2024-03-31");

    let reloaded = engine.load_report(&report.run_id).unwrap();
    assert_eq!(reloaded.run_id, report.run_id);
    assert_eq!(
        reloaded.bonus.unwrap().lines,
        report.bonus.unwrap().lines
    );

    let (latest_id, _) = engine.store.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest_id, report.run_id);
}

#[test]
fn unknown_run_is_an_error() {
    let engine = InsightEngine::build_test().unwrap();
    let err = engine.load_report("no-such-run").unwrap_err();
    assert!(matches!(err, InsightError::RunNotFound { .. }));
}

#[test]
fn city_filter_narrows_sales_and_orders() {
    let mut engine = loaded_engine();
    let filter = ReportFilter { city: Some("anápolis".into()), ..ReportFilter::default() };
    let report = engine.run_report(reference(), filter.clone()).unwrap();

    assert_eq!(report.filter, filter);
    let recon = report.reconciliation.unwrap();
    assert_eq!(recon.total_for(ProductTag::Pos).unwrap().counts.total, 2);
    assert_eq!(recon.total_for(ProductTag::BlDgo).unwrap().counts.total, 1);

    let reopening = report.reopening.unwrap();
    assert!(reopening.pairs.is_empty());
    assert_eq!(reopening.total_originals, 1);
}

#[test]
fn date_filter_keeps_only_targets_of_its_months() {
    let mut engine = InsightEngine::build_test().unwrap();
    for (sheet, text) in [
        (
            SheetKind::Sales,
            "Proposta;Vendedor;Agrupamento;Data Venda;Situação\n\
             201;ANA SOUZA;POS PAGO;10/01/2024;HABILITADA\n\
             202;ANA SOUZA;POS PAGO;20/01/2024;HABILITADA\n",
        ),
        (SheetKind::Payments, "Proposta;Passo;Status Pacote\n201;0;A\n202;0;A\n"),
        (
            SheetKind::Targets,
            "Vendedor;Mês;Linha;Meta\n\
             ANA SOUZA;01/2024;POS;2\n\
             ANA SOUZA;02/2024;POS;2\n\
             ANA SOUZA;03/2024;POS;2\n",
        ),
    ] {
        let rows = read_csv_str(text).unwrap();
        engine.import_sheet(sheet, "fixture", &rows).unwrap();
    }

    let whole = engine.run_report(reference(), ReportFilter::default()).unwrap();
    let line = &whole.bonus.unwrap().lines[0];
    assert_eq!(line.attainment_pct, Some(33.33));
    assert_eq!(line.volume_tier, VolumeTier::Abaixo);

    let january = ReportFilter {
        from: NaiveDate::from_ymd_opt(2024, 1, 1),
        to: NaiveDate::from_ymd_opt(2024, 1, 31),
        ..ReportFilter::default()
    };
    let report = engine.run_report(reference(), january).unwrap();

    let perf = &report.reconciliation.unwrap().performance[0];
    assert_eq!(perf.target, Some(2));
    assert_eq!(perf.attainment_pct, Some(100.0));

    let bonus = report.bonus.unwrap();
    assert_eq!(bonus.lines[0].volume_tier, VolumeTier::Meta);
    assert!(close(bonus.total_bonus, 36.0));
}

#[test]
fn empty_dataset_still_completes() {
    let mut engine = InsightEngine::build_test().unwrap();
    let report = engine.run_report(reference(), ReportFilter::default()).unwrap();

    assert!(report.reconciliation.unwrap().totals.is_empty());
    assert_eq!(report.resolution.unwrap().measured_orders, 0);
    assert!(report.bonus.unwrap().lines.is_empty());
    assert_eq!(engine.store.run_count().unwrap(), 1);
}
