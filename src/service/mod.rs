pub use app_error::{AppError, AppResult};
pub use client::PeerClient;
pub use config::{FrameworkConfig, NetworkConfig};
pub use server::{PeerServer, ServerState};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod client;
mod config;
mod server;
mod shutdown;
mod tracing_config;
