//! Merge engine: append sub-tables to a master workbook and carry its row
//! formulas down over the new rows.
//!
//! A run goes through these stages:
//!
//! 1. [`classify_sources`] assigns input files to sheet groups by keyword.
//! 2. [`MergeRun`] loads them into one [`SubTableBuffer`] per sheet.
//! 3. [`MergeCoordinator`] drives each sheet through
//!    [`SheetState`]: read the master region, align the schema with
//!    [`SchemaAligner`], append values (and dates) at the row from
//!    [`locate`], then fill formulas with [`ParallelFormulaFiller`].
//! 4. [`PersistenceStrategy`] saves in place, or replays the appended values
//!    into a prefixed copy when the in-place save fails.
//!
//! Progress is reported as [`StatusEvent`]s through a [`Reporter`].
//!
//! ```
//! use sheetmerge_engine::rewrite;
//!
//! assert_eq!(rewrite("=A2*$B$1+Sheet2!C2", 2, 10), "=A10*$B$1+Sheet2!C10");
//! ```

pub mod align;
pub mod bisect;
pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod dates;
pub mod error;
pub mod events;
pub mod fill;
pub mod locate;
pub mod persist;
pub mod rewrite;
pub mod run;
pub mod summary;

pub use align::{Aligned, SchemaAligner};
pub use bisect::{BisectPolicy, BisectTally, apply_bisecting};
pub use cache::FormulaCache;
pub use classify::{Classification, classify_sources};
pub use config::{FillerSettings, MergeConfig, SheetGroupConfig};
pub use coordinator::{
    AppendPlan, MergeCoordinator, SheetMatch, SheetReport, SheetState, SkipReason,
    resolve_sheet_name,
};
pub use dates::{DATE_SENTINEL, date_cell, date_from_file_name};
pub use error::{ConfigError, ConfigIssue, MergeError, PersistenceError, RunError};
pub use events::{CollectingSink, EventCounts, EventSink, Level, Reporter, StatusEvent, TracingSink};
pub use fill::{ColumnOutcome, ColumnStatus, ParallelFormulaFiller};
pub use locate::{AppendRange, locate};
pub use persist::{PersistenceStrategy, ResultArtifact, fallback_path};
pub use rewrite::{is_external_template, rewrite};
pub use run::{MergeRun, RunCounters, SourceFile, SubTableBuffer};
pub use summary::{RunSummary, SheetSummary};
