mod bridge;
mod host;
mod owner;
mod server;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
