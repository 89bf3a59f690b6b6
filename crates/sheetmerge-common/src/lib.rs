pub mod column;
pub mod table;
pub mod value;

pub use column::*;
pub use table::*;
pub use value::*;
