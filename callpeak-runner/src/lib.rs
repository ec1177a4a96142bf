pub mod driver;
pub mod sinks;

pub use driver::{
    run_details_validation, run_peak_analysis, ChunkFailure, RunContext, RunError, RunOutcome,
    RunParameters,
};
pub use sinks::{write_outputs, OutputPaths, RunMode, RunSummary, SinkError};
