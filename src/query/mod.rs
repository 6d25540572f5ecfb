pub mod context;
pub mod executor;
pub mod parser;

pub use context::{Highlight, get_context};
pub use executor::QueryExecutor;
pub use parser::parse_query;
// Re-exports for public API
pub use parser::{Instruction, PostfixForm};
