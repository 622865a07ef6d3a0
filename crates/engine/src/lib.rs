//! Air quality update engine.
//!
//! - `geo`: ZIP code → coordinates with a stale-while-revalidate cache
//! - `classifier`: AQI → alert tier, color and guidance
//! - `render`: per-subscriber email content
//! - `unsubscribe`: signed unsubscribe tokens
//! - `pipeline`: the scheduled fetch → store → classify → dispatch run
//! - `store`: persistence traits with Postgres and in-memory backends

pub mod classifier;
pub mod geo;
pub mod pipeline;
pub mod render;
pub mod store;
pub mod subscription;
pub mod unsubscribe;

pub use classifier::{AlertTier, Classification, ColorToken, classify};
pub use geo::{GeoResolver, RefreshEvent};
pub use pipeline::{PipelineError, RunSummary, UpdatePipeline, ZipReport};
pub use subscription::SubscriptionService;
pub use unsubscribe::{TokenError, UnsubscribeTokens};
