//! Configuration model and run records.

mod metric;
mod result;
mod system;
mod task;

pub use metric::*;
pub use result::*;
pub use system::*;
pub use task::*;
