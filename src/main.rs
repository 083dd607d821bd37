//! PayFast payment server entrypoint.
//!
//! Endpoints:
//! - `POST /api/create-payment` - Build a signed payment request
//! - `POST /api/payfast/notify` - Receive ITN callbacks from PayFast
//! - `GET /health` - Liveness and environment
//! - `GET /` - Service description
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` selects the JSON config file
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` controls log verbosity

use std::process;

use payfast_rs::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        println!("{e}");
        process::exit(1)
    }
}
