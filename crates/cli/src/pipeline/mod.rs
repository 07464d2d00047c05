//! Live feed orchestration module.

mod feed;
mod orchestrator;
mod producer;
mod stats;

pub use feed::{FeedMessage, LiveFeed};
pub use orchestrator::{DemoSettings, LivePipeline, PipelineConfig};
pub use producer::DemoProducer;
pub use stats::LiveStats;
