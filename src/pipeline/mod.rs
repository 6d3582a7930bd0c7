mod frame_pipeline;
mod mode;
mod session;
mod stats;

pub use frame_pipeline::{FramePipeline, PassOutcome};
pub use mode::ModeSlot;
pub use session::{Session, SessionConfig, SessionState};
pub use stats::{DropReason, PipelineStats, Stage, StatsSnapshot};
