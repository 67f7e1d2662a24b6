pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pool;
pub mod proxy;

pub use config::Config;
pub use error::{AppError, AppResult};

pub async fn run() -> AppResult<()> {
    let config = Config::from_env()?;
    logging::init(&config.data_dir);
    proxy::server::run(config).await
}
