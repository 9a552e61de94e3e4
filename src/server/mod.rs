pub mod api;

use anyhow::Result;

pub use api::ServerConfig;

pub async fn start(config: ServerConfig) -> Result<()> {
    api::serve(config).await
}
