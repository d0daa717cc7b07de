mod config;
mod events;
mod server;
mod verify;
mod webhook;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::ServiceConfig;
pub use server::run_server;
pub use webhook::{process_webhook, WebhookError};
