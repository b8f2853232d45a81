pub mod cancel;
pub mod collab;
pub mod config;
pub mod error;
pub mod exec;
pub mod log;
pub mod status;
pub mod tiers;
pub mod util;
pub mod warmup;

pub use cancel::CancellationScope;
pub use error::{Error, Result};
pub use tiers::{Tier, TierSequencer};
pub use warmup::{start_warmup, WarmupOrchestrator, WarmupResult};
