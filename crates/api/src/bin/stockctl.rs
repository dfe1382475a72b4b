//! Operator CLI.
//!
//! ```text
//! stockctl resync    reload the fast stock ledger from the durable one
//! ```
//!
//! Uses the same environment as the server. The exit code follows the
//! error kind of the failure.

use api::config::Config;
use api::error::ApiError;
use api::state::{Backends, StockManager};
use common::ErrorKind;

const USAGE: &str = "usage: stockctl resync";

async fn resync(config: &Config) -> Result<usize, ApiError> {
    let backends = Backends::connect(config).await?;
    let manager = StockManager::new(backends.fast, backends.stock_store);
    Ok(manager.resync_fast_ledger().await?)
}

fn exit_code(err: &ApiError) -> i32 {
    err.kind().unwrap_or(ErrorKind::Internal).exit_code()
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    api::telemetry::init_tracing(&config);

    let command = std::env::args().nth(1);
    match command.as_deref() {
        Some("resync") => match resync(&config).await {
            Ok(items) => println!("{}", serde_json::json!({ "items": items })),
            Err(e) => {
                eprintln!("resync failed: {e}");
                std::process::exit(exit_code(&e));
            }
        },
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(ErrorKind::Internal.exit_code());
        }
    }
}
