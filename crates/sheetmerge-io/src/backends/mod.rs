pub mod memory;

pub use memory::{MemoryStore, MemoryWorkbook};

#[cfg(feature = "umya")]
pub mod umya;

#[cfg(feature = "umya")]
pub use umya::{FsStore, UmyaWorkbook};
