//! Upload session coordination
//!
//! Talks to the coordination service, tracks session phases, and drives the
//! transfer pool between initialize and complete.

pub mod api;
pub mod digestion;
pub mod session;
pub mod uploader;

pub use api::{
    ApiClient, Completion, CoordinationService, GrantedPart, InitializeRequest, PresignedCompletion,
    UploadGrant,
};
pub use digestion::{run_digestion, run_sweep, DigestionService, DEFAULT_COPY_CONCURRENCY};
pub use session::{SessionPhase, UploadSession};
pub use uploader::UploadCoordinator;
