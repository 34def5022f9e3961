//! GitHub adapters: Contents API (implements `ContentHost`), workflow
//! dispatch, and the local agent-gateway client.

mod contents;
mod gateway;
mod http;
mod workflow;

pub use contents::GitHubContents;
pub use gateway::{GatewayClient, GatewayFile, GatewayPushResult};
pub use workflow::WorkflowClient;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
