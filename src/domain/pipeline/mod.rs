pub mod assembler;
pub mod batcher;
pub mod checkpoint;
pub mod chunker;
pub mod context;
pub mod duration;
pub mod error;
pub mod extractor;
pub mod runner;
pub mod settings;

pub use assembler::{Assembler, AssemblyOutcome};
pub use batcher::{BatchOutcome, Batcher, ProgressRange};
pub use checkpoint::{CheckpointManager, SuspendOutcome};
pub use context::JobContext;
pub use duration::{DurationEstimator, DurationProbe, Measurement};
pub use error::{ExtractionError, PipelineError, SynthesisError};
pub use extractor::{ExtractorKind, TextExtractor};
pub use runner::{recover_unfinished, JobRunner, PipelineDeps, RunOutcome, Worker};
pub use settings::PipelineSettings;
