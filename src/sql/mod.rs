//! SQL parsing and the structural model the safety checks run over.

pub mod parser;
pub mod statement;

pub use parser::{parse_statement, ParseFailure};
pub use statement::*;
