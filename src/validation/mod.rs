pub mod chain;

pub use chain::{ChainValidator, ChainVerdict};
