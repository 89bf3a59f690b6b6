use parking_lot::Mutex;
use sheetmerge_common::{CellValue, Column, Table};
use sheetmerge_engine::{
    CollectingSink, FillerSettings, Level, MergeConfig, MergeError, MergeRun,
    Reporter, ResultArtifact, RunError, SheetGroupConfig, SheetState, SkipReason,
};
use sheetmerge_io::{
    IoError, MemoryStore, MemoryWorkbook, WorkbookHandle, WorkbookStore, WriteError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MASTER: &str = "/books/master.xlsx";

fn col(label: &str) -> Column {
    Column::parse(label).unwrap()
}

fn text_row(cells: &[&str]) -> Vec<CellValue> {
    cells.iter().map(|c| CellValue::from(*c)).collect()
}

fn int_row(cells: &[i64]) -> Vec<CellValue> {
    cells.iter().map(|c| CellValue::Int(*c)).collect()
}

fn table(headers: &[&str], rows: Vec<Vec<CellValue>>) -> Table {
    Table::new(headers.iter().map(|h| Some(h.to_string())).collect(), rows).unwrap()
}

/// Orders: A = formula, B = date, C..D = data.
/// Refunds: A = formula, B..C = data.
fn master_store() -> MemoryStore {
    let wb = MemoryWorkbook::with_sheets(&["Orders", "Refunds"]);
    wb.set_row("Orders", 1, 1, &text_row(&["total", "date", "qty", "price"]));
    wb.set_formula("Orders", 2, 1, "=C2*D2");
    wb.set_row("Orders", 2, 2, &int_row(&[20240101, 1, 10]));
    wb.set_row("Refunds", 1, 1, &text_row(&["net", "amount", "fee"]));
    wb.set_formula("Refunds", 2, 1, "=B2-C2");
    wb.set_row("Refunds", 2, 2, &int_row(&[5, 1]));
    let store = MemoryStore::new();
    store.insert(MASTER, &wb);
    store
}

fn config() -> MergeConfig {
    MergeConfig::new(vec![
        SheetGroupConfig::new("Orders", col("C"), col("A"))
            .with_date_column(col("B"))
            .with_keyword("orders"),
        SheetGroupConfig::new("Refunds", col("B"), col("A")).with_keyword("refunds"),
    ])
}

fn run_with(config: MergeConfig) -> (MergeRun, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let run = MergeRun::new(config, Reporter::new(sink.clone(), true));
    (run, sink)
}

fn orders_sub() -> Table {
    table(&["q", "p"], vec![int_row(&[2, 5]), int_row(&[3, 7])])
}

#[test]
fn merges_values_dates_and_formulas() {
    let store = master_store();
    let (mut run, sink) = run_with(config());
    run.add_table("Orders", Path::new("/in/orders_20240315_day.csv"), orders_sub());

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.artifact, ResultArtifact::Original(PathBuf::from(MASTER)));

    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Orders", 3, 3), CellValue::Int(2));
    assert_eq!(wb.value("Orders", 4, 4), CellValue::Int(7));
    assert_eq!(wb.value("Orders", 3, 2), CellValue::Int(20240315));
    assert_eq!(wb.value("Orders", 4, 2), CellValue::Int(20240315));
    assert_eq!(wb.formula("Orders", 3, 1).as_deref(), Some("=C3*D3"));
    assert_eq!(wb.formula("Orders", 4, 1).as_deref(), Some("=C4*D4"));
    // headers and template row untouched
    assert_eq!(wb.value("Orders", 1, 3), CellValue::from("qty"));
    assert_eq!(wb.formula("Orders", 2, 1).as_deref(), Some("=C2*D2"));

    let orders = summary.sheet("Orders").unwrap();
    assert_eq!(orders.state, SheetState::Done);
    assert_eq!(orders.rows_merged, 2);
    assert_eq!(orders.columns_filled, 1);
    assert_eq!(summary.sheet("Refunds").unwrap().skipped, Some(SkipReason::NoSubData));
    assert!(summary.is_clean());
    assert!(sink.contains(Level::Info, "appended 2 row(s)"));
}

#[test]
fn second_run_appends_below_the_first() {
    let store = master_store();
    for _ in 0..2 {
        let (mut run, _) = run_with(config());
        run.add_table("Orders", Path::new("orders_20240316_.csv"), orders_sub());
        run.execute(&store, Path::new(MASTER)).unwrap();
    }
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Orders", 5, 3), CellValue::Int(2));
    assert_eq!(wb.value("Orders", 6, 3), CellValue::Int(3));
    assert_eq!(wb.value("Orders", 7, 3), CellValue::Empty);
    assert_eq!(wb.formula("Orders", 6, 1).as_deref(), Some("=C6*D6"));
}

#[test]
fn schema_mismatch_aborts_only_that_sheet() {
    let store = master_store();
    let (mut run, sink) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), orders_sub());
    run.add_table(
        "Refunds",
        Path::new("refunds_20240315_.csv"),
        table(&["a", "b", "c"], vec![int_row(&[1, 2, 3])]),
    );

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let refunds = summary.sheet("Refunds").unwrap();
    assert_eq!(refunds.state, SheetState::Aborted);
    assert_eq!(
        refunds.error.as_deref(),
        Some(MergeError::SchemaMismatch { master: 2, sub: 3 }.to_string().as_str())
    );
    assert_eq!(summary.sheet("Orders").unwrap().state, SheetState::Done);
    assert_eq!(run.counters().sheets_aborted, 1);
    assert_eq!(run.counters().sheets_done, 1);
    assert!(sink.contains(Level::Error, "column count mismatch"));

    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Refunds", 3, 2), CellValue::Empty);
}

#[test]
fn trailing_blank_rows_and_blank_columns_are_dropped() {
    let store = master_store();
    let (mut run, _) = run_with(config());
    let sub = Table::new(
        vec![Some("q".into()), None, Some("p".into())],
        vec![
            vec![CellValue::Int(4), CellValue::Empty, CellValue::Int(9)],
            vec![CellValue::Empty, CellValue::Empty, CellValue::Empty],
            vec![CellValue::Empty, CellValue::Text("  ".into()), CellValue::Empty],
        ],
    )
    .unwrap();
    run.add_table("Orders", Path::new("orders_20240315_.csv"), sub);

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Orders").unwrap().rows_merged, 1);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Orders", 3, 3), CellValue::Int(4));
    assert_eq!(wb.value("Orders", 3, 4), CellValue::Int(9));
    assert_eq!(wb.value("Orders", 4, 2), CellValue::Empty);
    assert_eq!(wb.formula("Orders", 4, 1), None);
}

#[test]
fn undated_file_writes_sentinel_and_warns() {
    let store = master_store();
    let (mut run, sink) = run_with(config());
    run.add_table("Orders", Path::new("/in/orders_latest.csv"), orders_sub());

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Orders").unwrap().state, SheetState::Done);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Orders", 3, 2), CellValue::from("error"));
    assert!(sink.contains(Level::Warning, "orders_latest.csv"));
}

#[test]
fn deselected_sheets_are_skipped() {
    let store = master_store();
    let (mut run, _) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), orders_sub());
    run.select(["Refunds"]);
    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Orders").unwrap().skipped, Some(SkipReason::NotSelected));
    assert_eq!(summary.sheet("Orders").unwrap().state, SheetState::Idle);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Orders", 3, 3), CellValue::Empty);
}

#[test]
fn missing_sheet_aborts() {
    let store = master_store();
    let mut cfg = config();
    cfg.groups.push(SheetGroupConfig::new("Ghost", col("B"), col("A")));
    let (mut run, _) = run_with(cfg);
    run.add_table("Ghost", Path::new("ghost.csv"), orders_sub());
    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let ghost = summary.sheet("Ghost").unwrap();
    assert_eq!(ghost.state, SheetState::Aborted);
    assert!(ghost.error.as_deref().unwrap().contains("Ghost"));
}

#[test]
fn unopenable_master_is_a_run_error() {
    let store = MemoryStore::new();
    let (mut run, _) = run_with(config());
    let err = run.execute(&store, Path::new("/nowhere.xlsx")).unwrap_err();
    assert!(matches!(err, RunError::Open { .. }));
}

/// Wraps a memory workbook, failing formula writes that touch `bad_rows`
/// and, optionally, every save.
struct Flaky {
    inner: Arc<MemoryWorkbook>,
    bad_rows: Vec<u32>,
    transient: bool,
    /// Remaining calls that fail regardless of rows.
    fail_first: Mutex<usize>,
    refuse_save: bool,
}

impl WorkbookHandle for Flaky {
    fn sheet_names(&self) -> Result<Vec<String>, IoError> {
        self.inner.sheet_names()
    }
    fn used_bounds(&self, sheet: &str) -> Result<Option<(u32, u32)>, IoError> {
        self.inner.used_bounds(sheet)
    }
    fn read_values(
        &self,
        sheet: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<Vec<CellValue>>, IoError> {
        self.inner.read_values(sheet, start, end)
    }
    fn read_formula(&self, sheet: &str, row: u32, col: u32) -> Result<Option<String>, IoError> {
        self.inner.read_formula(sheet, row, col)
    }
    fn write_values(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        values: &[Vec<CellValue>],
    ) -> Result<(), IoError> {
        self.inner.write_values(sheet, row, col, values)
    }
    fn write_formulas(
        &self,
        sheet: &str,
        col: u32,
        start_row: u32,
        formulas: &[String],
    ) -> Result<(), WriteError> {
        let fail = |msg: &str| {
            if self.transient {
                WriteError::transient(msg)
            } else {
                WriteError::permanent(msg)
            }
        };
        {
            let mut first = self.fail_first.lock();
            if *first > 0 {
                *first -= 1;
                return Err(WriteError::transient("apple event timed out"));
            }
        }
        let end = start_row + formulas.len() as u32 - 1;
        if self.bad_rows.iter().any(|r| (start_row..=end).contains(r)) {
            return Err(fail("cannot write formula"));
        }
        self.inner.write_formulas(sheet, col, start_row, formulas)
    }
    fn save(&self) -> Result<(), IoError> {
        if self.refuse_save {
            return Err(IoError::Unsupported("workbook is locked".into()));
        }
        self.inner.save()
    }
    fn path(&self) -> Option<&Path> {
        self.inner.path()
    }
}

struct FlakyStore {
    inner: MemoryStore,
    bad_rows: Vec<u32>,
    transient: bool,
    fail_first: usize,
    refuse_save: bool,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            bad_rows: Vec::new(),
            transient: true,
            fail_first: 0,
            refuse_save: false,
        }
    }
}

impl WorkbookStore for FlakyStore {
    fn open(&self, path: &Path) -> Result<Arc<dyn WorkbookHandle>, IoError> {
        let inner = self.inner.open_memory(path)?;
        // Only the master misbehaves; the fallback copy is healthy.
        if path != Path::new(MASTER) {
            return Ok(inner);
        }
        Ok(Arc::new(Flaky {
            inner,
            bad_rows: self.bad_rows.clone(),
            transient: self.transient,
            fail_first: Mutex::new(self.fail_first),
            refuse_save: self.refuse_save,
        }))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), IoError> {
        self.inner.copy(from, to)
    }
}

fn many_orders(n: i64) -> Table {
    table(&["q", "p"], (0..n).map(|i| int_row(&[i, 1])).collect())
}

#[test]
fn transient_failures_isolate_the_bad_row() {
    let mut store = FlakyStore::new(master_store());
    store.bad_rows = vec![6];
    let (mut run, _) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), many_orders(8));

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let orders = summary.sheet("Orders").unwrap();
    assert_eq!(orders.state, SheetState::Done);
    assert_eq!(orders.columns_failed, 1);
    assert_eq!(orders.formula_rows_failed, 1);
    assert_eq!(run.counters().formula_rows_succeeded, 7);
    assert_eq!(
        run.counters().formula_rows_succeeded + run.counters().formula_rows_failed,
        8
    );

    let wb = store.inner.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.formula("Orders", 5, 1).as_deref(), Some("=C5*D5"));
    assert_eq!(wb.formula("Orders", 6, 1), None);
    assert_eq!(wb.formula("Orders", 10, 1).as_deref(), Some("=C10*D10"));
}

#[test]
fn permanent_failure_fails_the_whole_batch() {
    let mut store = FlakyStore::new(master_store());
    store.bad_rows = vec![4];
    store.transient = false;
    let (mut run, _) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), many_orders(5));

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let orders = summary.sheet("Orders").unwrap();
    assert_eq!(orders.formula_rows_failed, 5);
    assert_eq!(orders.columns_failed, 1);
    assert_eq!(orders.state, SheetState::Done);
}

#[test]
fn passing_retries_end_filled() {
    let mut store = FlakyStore::new(master_store());
    store.fail_first = 2;
    let (mut run, _) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), many_orders(4));

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let orders = summary.sheet("Orders").unwrap();
    assert_eq!(orders.columns_filled, 1);
    assert_eq!(orders.formula_rows_failed, 0);
}

#[test]
fn refused_save_falls_back_to_prefixed_copy() {
    let mut store = FlakyStore::new(master_store());
    store.refuse_save = true;
    let (mut run, sink) = run_with(config());
    run.add_table("Orders", Path::new("orders_20240315_.csv"), orders_sub());

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let expected = PathBuf::from("/books/merged_master.xlsx");
    assert_eq!(summary.artifact, ResultArtifact::Fallback(expected.clone()));
    assert!(!summary.is_clean());

    let copy = store.inner.open_memory(&expected).unwrap();
    assert_eq!(copy.value("Orders", 3, 3), CellValue::Int(2));
    assert_eq!(copy.value("Orders", 4, 2), CellValue::Int(20240315));
    // values only
    assert_eq!(copy.formula("Orders", 3, 1), None);

    let original = store.inner.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(original.value("Orders", 3, 3), CellValue::Empty);
    assert!(sink.contains(Level::Warning, "merged_master.xlsx"));

    // the copy has the rows but not the formulas
    let orders = summary.sheet("Orders").unwrap();
    assert_eq!(orders.replayed, Some(true));
    assert_eq!(orders.rows_merged, 2);
    assert_eq!(orders.columns_filled, 0);
    assert_eq!(orders.formulas_dropped, 1);
}

#[test]
fn small_batches_still_cover_every_row() {
    let store = master_store();
    let mut cfg = config();
    cfg.filler = FillerSettings {
        local_batch_size: 3,
        max_workers: 2,
        ..FillerSettings::default()
    };
    let (mut run, _) = run_with(cfg);
    run.add_table("Orders", Path::new("orders_20240315_.csv"), many_orders(10));
    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Orders").unwrap().columns_filled, 1);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    for row in 3..=12 {
        assert_eq!(
            wb.formula("Orders", row, 1),
            Some(format!("=C{row}*D{row}")),
            "row {row}"
        );
    }
    assert_eq!(summary.sheet("Orders").unwrap().columns_failed, 0);
}

/// B = qty, C = blank gap, D = price; A multiplies them.
fn gapped_store() -> MemoryStore {
    let wb = MemoryWorkbook::with_sheets(&["Gapped"]);
    wb.set_value("Gapped", 1, 1, "total");
    wb.set_value("Gapped", 1, 2, "qty");
    wb.set_value("Gapped", 1, 4, "price");
    wb.set_formula("Gapped", 2, 1, "=B2*D2");
    wb.set_value("Gapped", 2, 2, 1);
    wb.set_value("Gapped", 2, 4, 10);
    let store = MemoryStore::new();
    store.insert(MASTER, &wb);
    store
}

fn gapped_config() -> MergeConfig {
    MergeConfig::new(vec![SheetGroupConfig::new("Gapped", col("B"), col("A"))])
}

#[test]
fn values_skip_a_blank_master_column() {
    let store = gapped_store();
    let (mut run, _) = run_with(gapped_config());
    run.add_table(
        "Gapped",
        Path::new("gapped.csv"),
        table(&["q", "p"], vec![int_row(&[7, 99])]),
    );

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Gapped").unwrap().state, SheetState::Done);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Gapped", 3, 2), CellValue::Int(7));
    assert_eq!(wb.value("Gapped", 3, 3), CellValue::Empty);
    assert_eq!(wb.value("Gapped", 3, 4), CellValue::Int(99));
    assert_eq!(wb.formula("Gapped", 3, 1).as_deref(), Some("=B3*D3"));
}

#[test]
fn sub_table_with_the_gap_column_lines_up() {
    let store = gapped_store();
    let (mut run, _) = run_with(gapped_config());
    let sub = Table::new(
        vec![Some("q".into()), None, Some("p".into())],
        vec![vec![CellValue::Int(7), CellValue::Empty, CellValue::Int(99)]],
    )
    .unwrap();
    run.add_table("Gapped", Path::new("gapped.csv"), sub);

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    assert_eq!(summary.sheet("Gapped").unwrap().state, SheetState::Done);
    let wb = store.open_memory(Path::new(MASTER)).unwrap();
    assert_eq!(wb.value("Gapped", 3, 2), CellValue::Int(7));
    assert_eq!(wb.value("Gapped", 3, 3), CellValue::Empty);
    assert_eq!(wb.value("Gapped", 3, 4), CellValue::Int(99));
}

#[test]
fn gap_layout_survives_the_fallback_replay() {
    let mut store = FlakyStore::new(gapped_store());
    store.refuse_save = true;
    let (mut run, _) = run_with(gapped_config());
    run.add_table(
        "Gapped",
        Path::new("gapped.csv"),
        table(&["q", "p"], vec![int_row(&[7, 99])]),
    );

    let summary = run.execute(&store, Path::new(MASTER)).unwrap();
    let copy = store.inner.open_memory(summary.artifact.path()).unwrap();
    assert_eq!(copy.value("Gapped", 3, 2), CellValue::Int(7));
    assert_eq!(copy.value("Gapped", 3, 3), CellValue::Empty);
    assert_eq!(copy.value("Gapped", 3, 4), CellValue::Int(99));
}
