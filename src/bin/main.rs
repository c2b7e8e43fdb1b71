//! Binary entrypoint for the klaris tool

#[tokio::main]
async fn main() {
    if let Err(e) = klaris::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
