//! Storage-facing half of sheetmerge.
//!
//! The merge engine never touches files directly. It talks to a
//! [`WorkbookHandle`] (usually through a sheet-bound [`SheetHandle`]), opens and
//! copies artifacts through a [`WorkbookStore`], and reads sub-tables through a
//! [`TableLoader`].

pub mod backends;
pub mod error;
pub mod loader;
pub mod traits;

pub use backends::{MemoryStore, MemoryWorkbook};
#[cfg(feature = "umya")]
pub use backends::{FsStore, UmyaWorkbook};
pub use error::{IoError, LoadError, WriteError, WriteErrorKind};
pub use loader::{LoadOptions, TableLoader};
pub use traits::{SheetHandle, WorkbookHandle, WorkbookStore};

// Re-export for convenience
pub use sheetmerge_common::{CellValue, Column, Table};
