//! Query-safety validation: the gate between the generator and the store.

pub mod engine;
pub mod lexical;
pub mod verdict;

pub use engine::{validate, validate_parsed};
pub use verdict::{ReasonCode, Rejection, Verdict};
