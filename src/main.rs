#[tokio::main]
async fn main() {
    if let Err(e) = aerogate::run().await {
        eprintln!("fatal: {}", e);
        std::process::exit(1);
    }
}
