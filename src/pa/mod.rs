pub mod engine;
pub mod sod;

pub use engine::{DgComparison, PaEngine, PaReport, PaRequest};
pub use sod::{parse_sod, ParsedSod};
