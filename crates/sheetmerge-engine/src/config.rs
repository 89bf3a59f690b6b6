//! Merge configuration: sheet groups plus filler tuning, loadable from YAML.

use crate::bisect::BisectPolicy;
use crate::error::{ConfigError, ConfigIssue};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use sheetmerge_common::Column;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LOCAL_BATCH_SIZE: usize = 3000;
pub const DEFAULT_EXTERNAL_BATCH_SIZE: usize = 400;
pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_COLUMN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_SPLIT_DEPTH: u32 = 3;
pub const DEFAULT_UNIT_RETRIES: u32 = 3;
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;
pub const DEFAULT_FALLBACK_PREFIX: &str = "merged_";

/// Layout of one master sheet.
///
/// Columns `A..=formula_end_column` hold per-row formulas; sub-table values
/// go to `data_start_column` and right of it. The optional date column sits
/// between the two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetGroupConfig {
    /// Sheet name in the master workbook.
    pub sheet: String,
    pub data_start_column: Column,
    pub formula_end_column: Column,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<Column>,
    /// Sub files whose name contains this keyword belong to the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_keyword: Option<String>,
}

impl SheetGroupConfig {
    pub fn new(sheet: impl Into<String>, data_start_column: Column, formula_end_column: Column) -> Self {
        Self {
            sheet: sheet.into(),
            data_start_column,
            formula_end_column,
            date_column: None,
            file_keyword: None,
        }
    }

    pub fn with_date_column(mut self, column: Column) -> Self {
        self.date_column = Some(column);
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.file_keyword = Some(keyword.into());
        self
    }

    fn check(&self, at: &str, issues: &mut Vec<ConfigIssue>) {
        if self.sheet.trim().is_empty() {
            issues.push(ConfigIssue::new(format!("{at}.sheet"), "sheet name is empty"));
        }
        if self.data_start_column <= self.formula_end_column {
            issues.push(ConfigIssue::new(
                format!("{at}.data_start_column"),
                format!(
                    "data start column {} must be right of formula end column {}",
                    self.data_start_column, self.formula_end_column
                ),
            ));
        }
        if let Some(date) = self.date_column {
            if date <= self.formula_end_column || date >= self.data_start_column {
                issues.push(ConfigIssue::new(
                    format!("{at}.date_column"),
                    format!(
                        "date column {date} must lie between {} and {}",
                        self.formula_end_column, self.data_start_column
                    ),
                ));
            }
        }
        if let Some(keyword) = &self.file_keyword {
            if keyword.trim().is_empty() {
                issues.push(ConfigIssue::new(
                    format!("{at}.file_keyword"),
                    "keyword is empty",
                ));
            }
        }
    }
}

/// Tuning of the parallel formula filler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FillerSettings {
    pub local_batch_size: usize,
    /// Batch size for templates that read from another workbook.
    pub external_batch_size: usize,
    pub max_workers: usize,
    pub column_timeout_secs: u64,
    pub max_split_depth: u32,
    pub unit_retries: u32,
    pub cache_capacity: usize,
}

impl Default for FillerSettings {
    fn default() -> Self {
        Self {
            local_batch_size: DEFAULT_LOCAL_BATCH_SIZE,
            external_batch_size: DEFAULT_EXTERNAL_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            column_timeout_secs: DEFAULT_COLUMN_TIMEOUT_SECS,
            max_split_depth: DEFAULT_MAX_SPLIT_DEPTH,
            unit_retries: DEFAULT_UNIT_RETRIES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl FillerSettings {
    pub fn column_timeout(&self) -> Duration {
        Duration::from_secs(self.column_timeout_secs)
    }

    pub fn bisect_policy(&self) -> BisectPolicy {
        BisectPolicy {
            max_depth: self.max_split_depth,
            unit_retries: self.unit_retries,
        }
    }

    pub fn batch_size(&self, external: bool) -> usize {
        if external {
            self.external_batch_size
        } else {
            self.local_batch_size
        }
    }

    fn check(&self, issues: &mut Vec<ConfigIssue>) {
        let positive = [
            ("filler.local_batch_size", self.local_batch_size as u64),
            ("filler.external_batch_size", self.external_batch_size as u64),
            ("filler.max_workers", self.max_workers as u64),
            ("filler.column_timeout_secs", self.column_timeout_secs),
        ];
        for (path, value) in positive {
            if value == 0 {
                issues.push(ConfigIssue::new(path, "must be greater than zero"));
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    pub groups: Vec<SheetGroupConfig>,
    #[serde(default)]
    pub filler: FillerSettings,
    /// Prefix of the fallback artifact's file name.
    #[serde(default = "default_fallback_prefix")]
    pub fallback_prefix: String,
}

fn default_fallback_prefix() -> String {
    DEFAULT_FALLBACK_PREFIX.to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            filler: FillerSettings::default(),
            fallback_prefix: default_fallback_prefix(),
        }
    }
}

impl MergeConfig {
    pub fn new(groups: Vec<SheetGroupConfig>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }

    /// Parse and validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: MergeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, ConfigError> {
        let config: MergeConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every group and the filler settings, reporting all problems at
    /// once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        let mut seen = FxHashSet::default();
        for (i, group) in self.groups.iter().enumerate() {
            let at = format!("groups[{i}]");
            group.check(&at, &mut issues);
            if !seen.insert(group.sheet.as_str()) {
                issues.push(ConfigIssue::new(
                    format!("{at}.sheet"),
                    format!("duplicate sheet '{}'", group.sheet),
                ));
            }
        }
        self.filler.check(&mut issues);
        if self.fallback_prefix.is_empty() {
            issues.push(ConfigIssue::new(
                "fallback_prefix",
                "empty prefix would overwrite the master",
            ));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    pub fn group(&self, sheet: &str) -> Option<&SheetGroupConfig> {
        self.groups.iter().find(|g| g.sheet == sheet)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.sheet.as_str())
    }

    /// The four sheet groups of the store-operations workbook this tool was
    /// first built for.
    pub fn reference_deployment() -> Self {
        let col = |label: &str| Column::parse(label).unwrap_or(Column::A);
        Self::new(vec![
            SheetGroupConfig::new("全站营销", col("G"), col("F")).with_keyword("全站营销"),
            SheetGroupConfig::new("站内数据源", col("G"), col("F")).with_keyword("日报数据"),
            SheetGroupConfig::new("站外数据源", col("F"), col("E")).with_keyword("下单订单明细"),
            SheetGroupConfig::new("店铺成交数据源", col("H"), col("F"))
                .with_date_column(col("G"))
                .with_keyword("全部渠道"),
        ])
    }
}
