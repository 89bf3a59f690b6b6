// End-to-end merge against real xlsx files; run with `--features umya`.

use sheetmerge_engine::{
    CollectingSink, Level, MergeConfig, MergeRun, Reporter, ResultArtifact, SheetState,
    classify_sources,
};
use sheetmerge_io::{CellValue, FsStore, TableLoader, UmyaWorkbook, WorkbookHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONFIG: &str = r#"
groups:
  - sheet: 店铺成交数据源
    data_start_column: C
    formula_end_column: A
    date_column: B
    file_keyword: 全部渠道
  - sheet: 站外数据源
    data_start_column: B
    formula_end_column: A
    file_keyword: 下单订单明细
"#;

fn build_master(dir: &Path) -> PathBuf {
    let mut book = umya_spreadsheet::new_file();
    let _ = book.new_sheet("店铺成交数据源");
    let _ = book.new_sheet("站外数据源");

    let shop = book.get_sheet_by_name_mut("店铺成交数据源").unwrap();
    shop.get_cell_mut("A1").set_value("gmv");
    shop.get_cell_mut("B1").set_value("date");
    shop.get_cell_mut("C1").set_value("orders");
    shop.get_cell_mut("D1").set_value("price");
    shop.get_cell_mut("A2").set_formula("C2*D2");
    shop.get_cell_mut("B2").set_value_number(20240101);
    shop.get_cell_mut("C2").set_value_number(1);
    shop.get_cell_mut("D2").set_value_number(9.5);

    let ext = book.get_sheet_by_name_mut("站外数据源").unwrap();
    ext.get_cell_mut("A1").set_value("double");
    ext.get_cell_mut("B1").set_value("count");
    ext.get_cell_mut("A2").set_formula("B2*2");
    ext.get_cell_mut("B2").set_value_number(4);

    let path = dir.join("总表.xlsx");
    umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
    path
}

fn write_sources(dir: &Path) -> Vec<PathBuf> {
    let files = [
        ("shop_20240301_全部渠道.csv", "orders,price\n2,3.5\n4,1\n"),
        ("shop_20240302_全部渠道.csv", "orders,price\n7,2\n"),
        ("ads_20240301_下单订单明细.csv", "count\n10\n11\n\n"),
        ("readme.txt", "not a source\n"),
    ];
    files
        .iter()
        .map(|(name, body)| {
            let p = dir.join(name);
            std::fs::write(&p, body).unwrap();
            p
        })
        .collect()
}

#[test]
fn classify_load_merge_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let master = build_master(dir.path());
    let sources = write_sources(dir.path());

    let config = MergeConfig::from_yaml_str(CONFIG).unwrap();
    let classification = classify_sources(&sources, &config);
    assert_eq!(classification.unrecognized.len(), 1);

    let sink = Arc::new(CollectingSink::new());
    let mut run = MergeRun::new(config, Reporter::new(sink.clone(), false));
    assert_eq!(run.load_classified(&TableLoader::default(), &classification), 3);
    assert_eq!(run.buffer("店铺成交数据源").unwrap().rows(), 3);

    let summary = run.execute(&FsStore, &master).unwrap();
    assert_eq!(summary.artifact, ResultArtifact::Original(master.clone()));
    assert_eq!(summary.sheet("店铺成交数据源").unwrap().state, SheetState::Done);
    assert_eq!(summary.sheet("站外数据源").unwrap().rows_merged, 2);
    assert!(sink.contains(Level::Warning, "readme.txt"));

    let wb = UmyaWorkbook::open_path(&master).unwrap();
    let shop = wb.read_values("店铺成交数据源", (3, 2), (5, 4)).unwrap();
    assert_eq!(
        shop,
        vec![
            vec![CellValue::Int(20240301), CellValue::Int(2), CellValue::Number(3.5)],
            vec![CellValue::Int(20240301), CellValue::Int(4), CellValue::Int(1)],
            vec![CellValue::Int(20240302), CellValue::Int(7), CellValue::Int(2)],
        ]
    );
    assert_eq!(
        wb.read_formula("店铺成交数据源", 5, 1).unwrap().as_deref(),
        Some("=C5*D5")
    );
    assert_eq!(
        wb.read_formula("站外数据源", 4, 1).unwrap().as_deref(),
        Some("=B4*2")
    );
    assert_eq!(wb.used_bounds("站外数据源").unwrap(), Some((4, 2)));
}
