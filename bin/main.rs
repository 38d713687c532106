//! nodemesh CLI Entry Point
//!
//! Runs one subnet node command and exits.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = nodemesh_interface::run_cli().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
