#[tokio::main]
async fn main() {
    if let Err(e) = blockgrid::runner::run().await {
        eprintln!("node failed: {}", e);
        std::process::exit(1);
    }
}
