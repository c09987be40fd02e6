//! insight-runner: headless dashboard runner for SysGest Insight Metrics.
//!
//! Usage:
//!   insight-runner --sales vendas.csv --payments primeiro_pagamento.csv \
//!                  --orders ordens.csv --targets metas.csv --base base.csv
//!   insight-runner --db insight.db --reference 2024-06-30 --city Goiânia --json
//!   insight-runner --db insight.db --show <run_id>

use anyhow::{Context, Result};
use chrono::NaiveDate;
use insight_core::{
    bonus_subsystem::VolumeTier,
    config::MetricsConfig,
    engine::InsightEngine,
    import::SheetKind,
    record::ProductTag,
    report::{DashboardReport, ReportFilter},
    store::InsightStore,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let json_mode = args.iter().any(|a| a == "--json");
    let db = arg_str(&args, "--db").unwrap_or(":memory:");
    let data_dir = arg_str(&args, "--data-dir").unwrap_or("./data");

    let store = InsightStore::open(db)?;
    store.migrate()?;

    let config = MetricsConfig::load(data_dir)
        .with_context(|| format!("loading rule tables from {data_dir}"))?;
    log::info!("rule tables loaded from {data_dir}, database {db}");
    let mut engine = InsightEngine::build(config, store);

    if let Some(run_id) = arg_str(&args, "--show") {
        let report = engine.load_report(run_id)?;
        return emit(&report, json_mode);
    }

    let sheets = [
        ("--orders", SheetKind::ServiceOrders),
        ("--sales", SheetKind::Sales),
        ("--payments", SheetKind::Payments),
        ("--targets", SheetKind::Targets),
        ("--base", SheetKind::Base),
    ];
    for (flag, sheet) in sheets {
        if let Some(path) = arg_str(&args, flag) {
            let summary = engine
                .import_csv_file(sheet, path)
                .with_context(|| format!("importing {path}"))?;
            if !json_mode {
                println!(
                    "  {:<15} {:>6} rows  ({} rejected)  {path}",
                    sheet.as_str(),
                    summary.accepted,
                    summary.rejected
                );
            }
        }
    }

    if let Some(tier) = arg_str(&args, "--volume-tier") {
        let tier = VolumeTier::from_label(tier)
            .with_context(|| format!("unknown volume tier '{tier}'"))?;
        engine.fix_volume_tier(tier);
    }

    let reference = match arg_str(&args, "--reference") {
        Some(text) => parse_day(text)?,
        None => chrono::Local::now().date_naive(),
    };
    let filter = build_filter(&args)?;

    let report = engine.run_report(reference, filter)?;
    emit(&report, json_mode)
}

fn build_filter(args: &[String]) -> Result<ReportFilter> {
    let product_tag = match arg_str(args, "--tag") {
        Some(t) => Some(ProductTag::from_label(t).with_context(|| format!("unknown product line '{t}'"))?),
        None => None,
    };
    Ok(ReportFilter {
        from: arg_str(args, "--from").map(parse_day).transpose()?,
        to: arg_str(args, "--to").map(parse_day).transpose()?,
        city: arg_str(args, "--city").map(str::to_string),
        salesperson: arg_str(args, "--salesperson").map(str::to_string),
        product_tag,
    })
}

fn emit(report: &DashboardReport, json_mode: bool) -> Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_summary(report);
    }
    Ok(())
}

fn print_summary(report: &DashboardReport) {
    println!();
    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {}", report.run_id);
    println!("  reference:      {}", report.reference_date);

    if let Some(recon) = &report.reconciliation {
        println!();
        println!("=== PERMANÊNCIA ===");
        for t in &recon.totals {
            println!(
                "  {:<7} vendas: {:>5} | adimplência: {:>6.2}% | inadimplência: {:>6.2}% | cancelamento: {:>6.2}% | inclusões: {}",
                t.key,
                t.counts.total,
                t.adimplencia_pct,
                t.inadimplencia_pct,
                t.cancelamento_pct,
                t.counts.inclusoes
            );
        }
        for trend in &recon.trends {
            let delta = trend
                .delta_pp
                .map(|d| format!("{d:+.2} p.p."))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {:<7} {:>6.2}%  {delta}",
                trend.period,
                trend.product_tag.label(),
                trend.adimplencia_pct
            );
        }
        println!(
            "  unmatched sales: {} | orphan payments: {} | duplicate payments: {}",
            recon.unmatched_sales, recon.orphan_payments, recon.duplicate_payments
        );
    }

    if let Some(reopening) = &report.reopening {
        println!();
        println!("=== REABERTURAS ===");
        println!(
            "  {} reaberturas / {} ordens finalizadas ({:.2}%)",
            reopening.total_reopenings, reopening.total_originals, reopening.overall_rate_pct
        );
        for row in reopening.by_technician.iter().filter(|r| r.reopenings > 0) {
            println!("  {:<30} {:>4} / {:<5} {:>6.2}%", row.key, row.reopenings, row.originals, row.rate_pct);
        }
    }

    if let Some(resolution) = &report.resolution {
        println!();
        println!("=== SLA ===");
        for row in &resolution.by_service_type {
            println!(
                "  {:<22} {:>5} ordens | média {:>7.2}h | meta {:>5.1}h | {:>6.2}% no prazo",
                row.key,
                row.orders,
                row.avg_hours,
                row.goal_hours.unwrap_or_default(),
                row.within_goal_pct
            );
        }
    }

    if let Some(bonus) = &report.bonus {
        println!();
        println!("=== BONIFICAÇÃO ===");
        for line in &bonus.lines {
            println!(
                "  {:<30} {:<7} adimpl. {:>6.2}% × {:>5.1}% | meta {:?} {:>5.1}% | R$ {:>8.2}",
                line.salesperson,
                line.product_tag.label(),
                line.adimplencia_pct,
                line.permanencia_multiplier_pct,
                line.volume_tier,
                line.meta_bonus_pct,
                line.bonus_value
            );
        }
        println!("  total: R$ {:.2}", bonus.total_bonus);
    }
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_day(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .with_context(|| format!("invalid date '{text}', expected YYYY-MM-DD"))
}
