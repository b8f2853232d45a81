//! Background warmup of slow-to-fetch artifacts.
//!
//! Model files and container images are fetched while the cluster comes
//! up. Both tasks share one cancellation scope so a failure in either
//! stops the other and the tier sequencer.

pub mod election;
pub mod image;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod task;

pub use election::{elect_node, ElectedNode, Topology};
pub use image::{ImagePrestager, ImageWarmup};
pub use model::ModelAcquisition;
pub use orchestrator::{
    start_image_warmup_async, start_model_warmup_async, start_warmup, WarmupOrchestrator,
    WarmupResult, WarmupSettings, WarmupState,
};
pub use retry::{is_transient, RetryPolicy, RetryState};
pub use task::{TaskHandle, TaskOutcome, TaskResult};
