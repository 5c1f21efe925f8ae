#[tokio::main]
async fn main() {
    if let Err(err) = sqlroute_lib::run().await {
        eprintln!("sqlroute: {}", err);
        std::process::exit(1);
    }
}
