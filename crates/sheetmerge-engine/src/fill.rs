//! Parallel re-application of template formulas after an append.
//!
//! One task per formula column runs on a bounded rayon pool. Each task reads
//! its template (row 2, else row 1), rewrites it for every target row through
//! the shared [`FormulaCache`], and writes it in batches with
//! [`apply_bisecting`]. The calling thread collects outcomes and abandons any
//! column that exceeds its timeout.

use crate::bisect::{BisectTally, apply_bisecting};
use crate::cache::FormulaCache;
use crate::config::FillerSettings;
use crate::events::{EventCounts, Reporter, StatusEvent};
use crate::rewrite::{external_workbook_name, is_external_template};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use sheetmerge_common::Column;
use sheetmerge_io::SheetHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Row whose formulas are the templates.
pub const TEMPLATE_ROW: u32 = 2;
/// First row the filler writes.
pub const FIRST_FILL_ROW: u32 = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long an abandoned column may take to reach its next batch boundary
/// and report what it wrote.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnStatus {
    /// Every row was written.
    Filled,
    /// No template formula in row 2 or row 1.
    Skipped,
    TimedOut,
    /// At least one row could not be written.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnOutcome {
    pub column: Column,
    pub rows_attempted: usize,
    pub rows_succeeded: usize,
    pub rows_failed: usize,
    pub elapsed: Duration,
    pub status: ColumnStatus,
    pub external: bool,
    pub splits: usize,
    pub unit_fallbacks: usize,
}

impl ColumnOutcome {
    fn skipped(column: Column, elapsed: Duration) -> Self {
        Self {
            column,
            rows_attempted: 0,
            rows_succeeded: 0,
            rows_failed: 0,
            elapsed,
            status: ColumnStatus::Skipped,
            external: false,
            splits: 0,
            unit_fallbacks: 0,
        }
    }

    fn all_failed(column: Column, rows: usize, elapsed: Duration, status: ColumnStatus) -> Self {
        Self {
            column,
            rows_attempted: rows,
            rows_succeeded: 0,
            rows_failed: rows,
            elapsed,
            status,
            external: false,
            splits: 0,
            unit_fallbacks: 0,
        }
    }

    /// Rows not confirmed written by the deadline count as failed.
    fn timed_out(column: Column, rows: usize, succeeded: usize, elapsed: Duration) -> Self {
        let succeeded = succeeded.min(rows);
        Self {
            rows_succeeded: succeeded,
            rows_failed: rows - succeeded,
            ..Self::all_failed(column, rows, elapsed, ColumnStatus::TimedOut)
        }
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            attempted: self.rows_attempted,
            succeeded: self.rows_succeeded,
            failed: self.rows_failed,
        }
    }
}

/// Start time of each column task, in microseconds after the pass began
/// plus one; zero means not started yet.
struct StartTimes {
    base: Instant,
    slots: Vec<AtomicU64>,
}

impl StartTimes {
    fn new(n: usize) -> Self {
        Self {
            base: Instant::now(),
            slots: (0..n).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn mark(&self, i: usize) -> Instant {
        let now = Instant::now();
        let micros = now.duration_since(self.base).as_micros() as u64 + 1;
        self.slots[i].store(micros, Ordering::Release);
        now
    }

    fn started(&self, i: usize) -> Option<Instant> {
        match self.slots[i].load(Ordering::Acquire) {
            0 => None,
            m => Some(self.base + Duration::from_micros(m - 1)),
        }
    }
}

pub struct ParallelFormulaFiller {
    settings: FillerSettings,
    cache: Arc<FormulaCache>,
    reporter: Reporter,
}

impl ParallelFormulaFiller {
    pub fn new(settings: FillerSettings, reporter: Reporter) -> Self {
        let cache = Arc::new(FormulaCache::new(settings.cache_capacity));
        Self {
            settings,
            cache,
            reporter,
        }
    }

    pub fn settings(&self) -> &FillerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    /// Drop cached rewrites; call between merge passes only.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Worker count for `columns` column tasks.
    pub fn worker_count(&self, columns: usize) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.min(self.settings.max_workers).min(columns).max(1)
    }

    /// Fill rows `3..=last_row` of every column `A..=formula_end`.
    ///
    /// Returns one outcome per column in column order. Columns never abort
    /// each other; an overdue column is reported `TimedOut` and left to stop
    /// at its next batch boundary.
    pub fn fill(&self, sheet: &SheetHandle, formula_end: Column, last_row: u32) -> Vec<ColumnOutcome> {
        let columns: Vec<Column> = formula_end.from_a_through().collect();
        if last_row < FIRST_FILL_ROW {
            self.reporter.emit(
                StatusEvent::info("no appended rows need formulas").sheet(sheet.name()),
            );
            return Vec::new();
        }
        let rows = (last_row - FIRST_FILL_ROW + 1) as usize;
        let workers = self.worker_count(columns.len());
        self.reporter.emit(
            StatusEvent::info(format!(
                "filling formulas in {} column(s) A..{formula_end} over rows {FIRST_FILL_ROW}..{last_row} with {workers} worker(s)",
                columns.len()
            ))
            .sheet(sheet.name()),
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sheetmerge-fill-{i}"))
            // A panicking column shows up as a failed outcome.
            .panic_handler(|_| {})
            .build();
        let pool = match pool {
            Ok(pool) => pool,
            Err(e) => {
                self.reporter.emit(
                    StatusEvent::warning(format!(
                        "worker pool unavailable ({e}); filling columns sequentially"
                    ))
                    .sheet(sheet.name()),
                );
                return self.fill_sequential(sheet, &columns, last_row);
            }
        };

        let n = columns.len();
        let timeout = self.settings.column_timeout();
        let starts = Arc::new(StartTimes::new(n));
        let stops: Arc<Vec<AtomicBool>> = Arc::new((0..n).map(|_| AtomicBool::new(false)).collect());
        let written: Arc<Vec<AtomicUsize>> = Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
        let (tx, rx) = mpsc::channel::<(usize, ColumnOutcome)>();

        for (i, &column) in columns.iter().enumerate() {
            let task = ColumnTask {
                sheet: sheet.clone(),
                column,
                last_row,
                settings: self.settings.clone(),
                cache: self.cache.clone(),
                reporter: self.reporter.clone(),
            };
            let tx = tx.clone();
            let starts = starts.clone();
            let stops = stops.clone();
            let written = written.clone();
            pool.spawn(move || {
                let started = starts.mark(i);
                let outcome = task.run(started, timeout, &stops[i], &written[i]);
                let _ = tx.send((i, outcome));
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<ColumnOutcome>> = vec![None; n];
        let mut abandoned = vec![false; n];
        let mut pending = n;
        // Queued tasks may never start if earlier ones hang.
        let queue_limit = timeout.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX));
        while pending > 0 {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((i, outcome)) => {
                    if outcomes[i].is_none() {
                        self.report_column(sheet, &outcome);
                        outcomes[i] = Some(outcome);
                        pending -= 1;
                    } else if abandoned[i] {
                        abandoned[i] = false;
                        self.settle_abandoned(sheet, &mut outcomes[i], &outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let now = Instant::now();
            for i in 0..n {
                if outcomes[i].is_some() {
                    continue;
                }
                let overdue = match starts.started(i) {
                    Some(t) => now.duration_since(t) >= timeout,
                    None => now.duration_since(starts.base) >= queue_limit,
                };
                if overdue {
                    stops[i].store(true, Ordering::Relaxed);
                    let elapsed = starts
                        .started(i)
                        .map(|t| now.duration_since(t))
                        .unwrap_or_default();
                    let outcome = ColumnOutcome::timed_out(
                        columns[i],
                        rows,
                        written[i].load(Ordering::Acquire),
                        elapsed,
                    );
                    self.report_column(sheet, &outcome);
                    outcomes[i] = Some(outcome);
                    abandoned[i] = starts.started(i).is_some();
                    pending -= 1;
                }
            }
        }

        // Give stopped columns a bounded chance to finish their current batch
        // so the workbook is quiet before it is saved.
        let deadline = Instant::now() + STOP_GRACE.min(timeout);
        while abandoned.iter().any(|a| *a) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match rx.recv_timeout(left) {
                Ok((i, late)) if abandoned[i] => {
                    abandoned[i] = false;
                    self.settle_abandoned(sheet, &mut outcomes[i], &late);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        // Disconnected with results missing: those tasks panicked.
        let outcomes: Vec<ColumnOutcome> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                o.unwrap_or_else(|| {
                    let outcome =
                        ColumnOutcome::all_failed(columns[i], rows, Duration::ZERO, ColumnStatus::Failed);
                    self.report_column(sheet, &outcome);
                    outcome
                })
            })
            .collect();
        self.report_pass(sheet, &outcomes);
        outcomes
    }

    /// Fold the late result of an abandoned column into its `TimedOut`
    /// outcome: the rows it actually wrote count as succeeded.
    fn settle_abandoned(
        &self,
        sheet: &SheetHandle,
        slot: &mut Option<ColumnOutcome>,
        late: &ColumnOutcome,
    ) {
        let Some(outcome) = slot.as_mut() else { return };
        let succeeded = late.rows_succeeded.min(outcome.rows_attempted);
        outcome.rows_succeeded = succeeded;
        outcome.rows_failed = outcome.rows_attempted - succeeded;
        outcome.external = late.external;
        self.reporter.emit(
            StatusEvent::debug(format!(
                "column {} stopped after writing {succeeded} row(s)",
                outcome.column
            ))
            .sheet(sheet.name())
            .column(outcome.column.letters())
            .counts(outcome.counts()),
        );
    }

    fn fill_sequential(&self, sheet: &SheetHandle, columns: &[Column], last_row: u32) -> Vec<ColumnOutcome> {
        let timeout = self.settings.column_timeout();
        let outcomes: Vec<ColumnOutcome> = columns
            .iter()
            .map(|&column| {
                let task = ColumnTask {
                    sheet: sheet.clone(),
                    column,
                    last_row,
                    settings: self.settings.clone(),
                    cache: self.cache.clone(),
                    reporter: self.reporter.clone(),
                };
                let outcome = task.run(
                    Instant::now(),
                    timeout,
                    &AtomicBool::new(false),
                    &AtomicUsize::new(0),
                );
                self.report_column(sheet, &outcome);
                outcome
            })
            .collect();
        self.report_pass(sheet, &outcomes);
        outcomes
    }

    fn report_column(&self, sheet: &SheetHandle, outcome: &ColumnOutcome) {
        let column = outcome.column.letters();
        let event = match outcome.status {
            ColumnStatus::Filled => StatusEvent::debug(format!(
                "column {column} filled: {} row(s) in {:.2}s",
                outcome.rows_succeeded,
                outcome.elapsed.as_secs_f64()
            )),
            ColumnStatus::Skipped => {
                StatusEvent::debug(format!("column {column} has no template formula, skipped"))
            }
            ColumnStatus::TimedOut => StatusEvent::warning(format!(
                "column {column} exceeded {}s and was abandoned; check that referenced workbooks are reachable",
                self.settings.column_timeout_secs
            )),
            ColumnStatus::Failed => StatusEvent::warning(format!(
                "column {column} filled with failures: {} succeeded, {} failed",
                outcome.rows_succeeded, outcome.rows_failed
            )),
        };
        self.reporter
            .emit(event.sheet(sheet.name()).column(column).counts(outcome.counts()));
    }

    fn report_pass(&self, sheet: &SheetHandle, outcomes: &[ColumnOutcome]) {
        let count = |s: ColumnStatus| outcomes.iter().filter(|o| o.status == s).count();
        let failed = count(ColumnStatus::Failed) + count(ColumnStatus::TimedOut);
        self.reporter.emit(
            StatusEvent::info(format!(
                "formula fill done: {} column(s) filled, {failed} failed, {} skipped",
                count(ColumnStatus::Filled),
                count(ColumnStatus::Skipped)
            ))
            .sheet(sheet.name()),
        );
    }
}

struct ColumnTask {
    sheet: SheetHandle,
    column: Column,
    last_row: u32,
    settings: FillerSettings,
    cache: Arc<FormulaCache>,
    reporter: Reporter,
}

impl ColumnTask {
    fn template(&self) -> Result<Option<String>, sheetmerge_io::IoError> {
        for row in [TEMPLATE_ROW, 1] {
            if let Some(f) = self.sheet.read_formula(self.column, row)? {
                if !f.trim_start_matches('=').trim().is_empty() {
                    return Ok(Some(f));
                }
            }
        }
        Ok(None)
    }

    /// `written` tracks rows written so far, for a caller that gives up on
    /// this column before it returns.
    fn run(
        &self,
        started: Instant,
        timeout: Duration,
        stop: &AtomicBool,
        written: &AtomicUsize,
    ) -> ColumnOutcome {
        let rows = (self.last_row - FIRST_FILL_ROW + 1) as usize;
        let column_label = self.column.letters();
        let template = match self.template() {
            Ok(Some(t)) => t,
            Ok(None) => return ColumnOutcome::skipped(self.column, started.elapsed()),
            Err(e) => {
                self.reporter.emit(
                    StatusEvent::error(format!("cannot read template formula: {e}"))
                        .sheet(self.sheet.name())
                        .column(column_label),
                );
                return ColumnOutcome::all_failed(
                    self.column,
                    rows,
                    started.elapsed(),
                    ColumnStatus::Failed,
                );
            }
        };
        let external = is_external_template(&template);
        let batch_size = u32::try_from(self.settings.batch_size(external))
            .unwrap_or(u32::MAX)
            .max(1);
        let policy = self.settings.bisect_policy();

        let mut tally = BisectTally::default();
        let mut timed_out = false;
        let mut row = FIRST_FILL_ROW;
        while row <= self.last_row {
            if started.elapsed() >= timeout {
                stop.store(true, Ordering::Relaxed);
            }
            if stop.load(Ordering::Relaxed) {
                timed_out = true;
                break;
            }
            let end = row.saturating_add(batch_size - 1).min(self.last_row);
            let formulas: Vec<String> = (row..=end)
                .map(|target| self.cache.rewrite(&template, TEMPLATE_ROW, target))
                .collect();
            let batch = apply_bisecting(&formulas, policy, stop, |offset, slice| {
                self.sheet
                    .write_formulas(self.column, row + offset as u32, slice)
            });
            self.reporter.emit(
                StatusEvent::debug(format!(
                    "rows {row}..{end}: {} written, {} failed",
                    batch.succeeded, batch.failed
                ))
                .sheet(self.sheet.name())
                .column(column_label.clone()),
            );
            written.fetch_add(batch.succeeded, Ordering::Release);
            tally.merge(batch);
            if end == self.last_row {
                break;
            }
            row = end + 1;
        }

        if timed_out {
            return ColumnOutcome {
                external,
                ..ColumnOutcome::timed_out(self.column, rows, tally.succeeded, started.elapsed())
            };
        }

        if tally.failed > 0 && external {
            if let Some(book) = external_workbook_name(&template) {
                self.reporter.emit(
                    StatusEvent::info(format!(
                        "failures may mean workbook '{book}' cannot be found; make sure it exists and is reachable"
                    ))
                    .sheet(self.sheet.name())
                    .column(column_label),
                );
            }
        }

        ColumnOutcome {
            column: self.column,
            rows_attempted: tally.attempted,
            rows_succeeded: tally.succeeded,
            rows_failed: tally.failed,
            elapsed: started.elapsed(),
            status: if tally.failed == 0 {
                ColumnStatus::Filled
            } else {
                ColumnStatus::Failed
            },
            external,
            splits: tally.splits,
            unit_fallbacks: tally.unit_fallbacks,
        }
    }
}
