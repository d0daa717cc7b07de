pub mod entities;
pub mod gateway;
pub mod jobs;
pub mod store;
pub mod triage;

mod service;

pub use service::{process_webhook, run_server, ServiceConfig, WebhookError};
