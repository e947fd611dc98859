pub mod adapter;
pub mod middleware;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod synth;

pub use pipeline::{Fate, PipelineResult, QueryPipeline};
pub use server::ProxyServer;
pub use session::ProxySession;
