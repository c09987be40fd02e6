//! The metrics engine: imports sheets and runs the dashboard.
//!
//! EXECUTION ORDER:
//!   1. Reconciliation subsystem  (sales × first payments)
//!   2. Reopening subsystem       (service-order pairs)
//!   3. Resolution subsystem      (time-to-resolution vs SLA)
//!   4. Bonus subsystem           (reads section 1)
//!
//! RULES:
//!   - Subsystems execute in registration order, once per run.
//!   - A subsystem reads the dataset and sections written before it.
//!   - No subsystem calls another subsystem's functions directly.
//!   - Every event is recorded in the event log under the run id.

use crate::{
    bonus_subsystem::{BonusSubsystem, VolumeTier},
    config::MetricsConfig,
    error::{InsightError, InsightResult},
    event::{EventLogEntry, InsightEvent},
    import::{read_csv_file, SheetKind},
    normalizer::{
        missing_key_column, normalize_base, normalize_payments, normalize_sales,
        normalize_service_orders, normalize_targets, Normalized, RawRow,
    },
    reconciliation_subsystem::ReconciliationSubsystem,
    record::Dataset,
    reopening_subsystem::ReopeningSubsystem,
    report::{DashboardReport, ReportFilter, RunContext},
    resolution_subsystem::ResolutionSubsystem,
    store::InsightStore,
    subsystem::MetricsSubsystem,
    types::{BatchId, RunId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: BatchId,
    pub sheet:    SheetKind,
    pub accepted: usize,
    pub rejected: usize,
}

pub struct InsightEngine {
    pub config:  MetricsConfig,
    pub store:   InsightStore,
    subsystems:  Vec<Box<dyn MetricsSubsystem>>,
}

impl InsightEngine {
    pub fn new(config: MetricsConfig, store: InsightStore) -> Self {
        Self { config, store, subsystems: Vec::new() }
    }

    /// Build a fully wired engine with all subsystems registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: MetricsConfig, store: InsightStore) -> Self {
        let mut engine = InsightEngine::new(config, store);

        // Bonus reads the reconciliation section, so it goes last.
        let c = engine.config.clone();
        engine.register(Box::new(ReconciliationSubsystem::new(c.classification)));
        engine.register(Box::new(ReopeningSubsystem::new(c.reopening)));
        engine.register(Box::new(ResolutionSubsystem::new(c.sla)));
        engine.register(Box::new(BonusSubsystem::new(c.bonus)));
        engine
    }

    /// In-memory store, migrated, with the built-in rule tables.
    pub fn build_test() -> InsightResult<Self> {
        let store = InsightStore::in_memory()?;
        store.migrate()?;
        Ok(Self::build(MetricsConfig::default_test(), store))
    }

    /// Register a subsystem. Call in the documented execution order.
    pub fn register(&mut self, subsystem: Box<dyn MetricsSubsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn subsystem_names(&self) -> Vec<&'static str> {
        self.subsystems.iter().map(|s| s.name()).collect()
    }

    fn bonus_mut(&mut self) -> Option<&mut BonusSubsystem> {
        self.subsystems
            .iter_mut()
            .find_map(|s| s.as_any_mut().downcast_mut::<BonusSubsystem>())
    }

    /// Pin a salesperson's volume tier, as the dashboard selector does.
    pub fn select_volume_tier(&mut self, salesperson: &str, tier: VolumeTier) {
        if let Some(bonus) = self.bonus_mut() {
            bonus.select_tier(salesperson, tier);
        }
    }

    /// Pin everyone's volume tier instead of deriving it from targets.
    pub fn fix_volume_tier(&mut self, tier: VolumeTier) {
        if let Some(bonus) = self.bonus_mut() {
            bonus.set_fixed_tier(Some(tier));
        }
    }

    // ── Imports ────────────────────────────────────────────────

    /// Normalize and persist one sheet. The new batch replaces the previous
    /// upload of the same sheet for later runs. A sheet without its key
    /// column is refused whole; otherwise bad rows are only rejected.
    pub fn import_sheet(
        &mut self,
        sheet: SheetKind,
        source: &str,
        rows: &[RawRow],
    ) -> InsightResult<ImportSummary> {
        if let Some(column) = missing_key_column(sheet, rows) {
            return Err(InsightError::MissingColumn {
                sheet:  sheet.as_str().to_string(),
                column: column.to_string(),
            });
        }
        let batch_id = uuid::Uuid::new_v4().to_string();
        let (accepted, rejected) = match sheet {
            SheetKind::ServiceOrders => self.persist(&batch_id, sheet, source, normalize_service_orders(rows))?,
            SheetKind::Sales         => self.persist(&batch_id, sheet, source, normalize_sales(rows))?,
            SheetKind::Payments      => self.persist(&batch_id, sheet, source, normalize_payments(rows))?,
            SheetKind::Targets       => self.persist(&batch_id, sheet, source, normalize_targets(rows))?,
            SheetKind::Base          => self.persist(&batch_id, sheet, source, normalize_base(rows))?,
        };

        log::info!(
            "imported {} from {source}: {accepted} accepted, {rejected} rejected",
            sheet.as_str()
        );

        Ok(ImportSummary { batch_id, sheet, accepted, rejected })
    }

    pub fn import_csv_file(&mut self, sheet: SheetKind, path: &str) -> InsightResult<ImportSummary> {
        let rows = read_csv_file(path)?;
        self.import_sheet(sheet, path, &rows)
    }

    fn persist<T: Serialize>(
        &mut self,
        batch_id: &str,
        sheet: SheetKind,
        source: &str,
        normalized: Normalized<T>,
    ) -> InsightResult<(usize, usize)> {
        self.store
            .insert_batch(batch_id, sheet, source, &normalized.records, &normalized.rejected)?;

        let mut events: Vec<InsightEvent> = normalized
            .rejected
            .iter()
            .map(|r| InsightEvent::RowRejected {
                batch_id: batch_id.to_string(),
                sheet,
                line: r.line,
                reason: r.reason.clone(),
            })
            .collect();
        events.push(InsightEvent::ImportCompleted {
            batch_id: batch_id.to_string(),
            sheet,
            accepted: normalized.records.len(),
            rejected: normalized.rejected.len(),
        });
        self.log_events(batch_id, "import", 0, &events)?;

        Ok((normalized.records.len(), normalized.rejected.len()))
    }

    /// The latest upload of every sheet.
    pub fn dataset(&self) -> InsightResult<Dataset> {
        Ok(Dataset {
            service_orders: self.store.latest_records(SheetKind::ServiceOrders)?,
            sales:          self.store.latest_records(SheetKind::Sales)?,
            payments:       self.store.latest_records(SheetKind::Payments)?,
            targets:        self.store.latest_records(SheetKind::Targets)?,
            base:           self.store.latest_records(SheetKind::Base)?,
        })
    }

    // ── Runs ───────────────────────────────────────────────────

    /// Run every subsystem over the stored dataset.
    pub fn run_report(
        &mut self,
        reference_date: NaiveDate,
        filter: ReportFilter,
    ) -> InsightResult<DashboardReport> {
        let dataset = self.dataset()?;
        self.run_report_on(&dataset, reference_date, filter)
    }

    /// Run every subsystem over a dataset supplied by the caller.
    pub fn run_report_on(
        &mut self,
        dataset: &Dataset,
        reference_date: NaiveDate,
        filter: ReportFilter,
    ) -> InsightResult<DashboardReport> {
        let run_id: RunId = uuid::Uuid::new_v4().to_string();
        self.store.insert_run(
            &run_id,
            &reference_date.to_string(),
            &serde_json::to_string(&filter)?,
            env!("CARGO_PKG_VERSION"),
        )?;

        let ctx = RunContext { run_id: run_id.clone(), reference_date };
        let filtered = filter.apply(dataset);
        let mut report = DashboardReport::new(&ctx, filter);

        let mut seq = 0;
        let started = InsightEvent::RunStarted { run_id: run_id.clone(), reference_date };
        seq = self.log_events(&run_id, "engine", seq, &[started])?;

        // Execute each subsystem in registration order.
        // Each subsystem sees the sections written before it.
        for i in 0..self.subsystems.len() {
            let name = self.subsystems[i].name();
            let events = self.subsystems[i].update(&ctx, &filtered, &mut report)?;
            log::debug!("run={run_id} {name}: {} events", events.len());
            seq = self.log_events(&run_id, name, seq, &events)?;
        }

        let completed = InsightEvent::RunCompleted { run_id: run_id.clone() };
        self.log_events(&run_id, "engine", seq, &[completed])?;

        self.store.save_snapshot(&run_id, &serde_json::to_string(&report)?)?;
        self.store.complete_run(&run_id)?;

        log::info!(
            "run {run_id} completed: {} sales, {} orders",
            filtered.sales.len(),
            filtered.service_orders.len()
        );
        Ok(report)
    }

    /// Reload a stored report without recomputing it.
    pub fn load_report(&self, run_id: &str) -> InsightResult<DashboardReport> {
        let json = self
            .store
            .load_snapshot(run_id)?
            .ok_or_else(|| InsightError::RunNotFound { run_id: run_id.to_string() })?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn events_for_run(&self, run_id: &str) -> InsightResult<Vec<EventLogEntry>> {
        self.store.events_for_run(run_id)
    }

    /// Persist events in order; returns the next sequence number.
    fn log_events(
        &self,
        run_id: &str,
        subsystem: &str,
        mut seq: u64,
        events: &[InsightEvent],
    ) -> InsightResult<u64> {
        for event in events {
            let entry = EventLogEntry {
                id:         None,
                run_id:     run_id.to_string(),
                seq,
                subsystem:  subsystem.to_string(),
                event_type: event_type_name(event).to_string(),
                payload:    serde_json::to_string(event)?,
            };
            self.store.append_event(&entry)?;
            seq += 1;
        }
        Ok(seq)
    }
}

/// Extract a stable string name from an InsightEvent variant.
/// Used for the event_type column in event_log.
pub fn event_type_name(event: &InsightEvent) -> &'static str {
    match event {
        InsightEvent::RunStarted { .. }             => "run_started",
        InsightEvent::RunCompleted { .. }           => "run_completed",
        InsightEvent::ImportCompleted { .. }        => "import_completed",
        InsightEvent::RowRejected { .. }            => "row_rejected",
        InsightEvent::UnmatchedSale { .. }          => "unmatched_sale",
        InsightEvent::DuplicatePayment { .. }       => "duplicate_payment",
        InsightEvent::ReconciliationComputed { .. } => "reconciliation_computed",
        InsightEvent::ReopeningDetected { .. }      => "reopening_detected",
        InsightEvent::NegativeResolutionSpan { .. } => "negative_resolution_span",
        InsightEvent::SlaComputed { .. }            => "sla_computed",
        InsightEvent::BonusComputed { .. }          => "bonus_computed",
    }
}
