// Public module exports
pub mod decoder;
pub mod events;
pub mod executor;
pub mod state;

// Re-export main types for convenience
pub use decoder::FrameDecoder;
pub use events::{RunEvent, RunOutcome, StepStatus};
pub use executor::{CancellationToken, RequestManager, RunExecutor, RunUpdate};
pub use state::{Notice, RetryNotice, RunSnapshot, RunStateMachine, RunStatus, StepState};
