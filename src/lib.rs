pub mod backend;
pub mod error;
pub mod runs;

pub mod handlers;
pub mod init;
pub mod models;

pub use crate::backend::{BackendClient, BackendError};
pub use crate::init::{AppState, Config};
pub use crate::models::{BrowserEngine, RunRequest, TestStep};
pub use crate::runs::{RunEvent, RunExecutor, RunSnapshot, RunStateMachine, RunUpdate};
