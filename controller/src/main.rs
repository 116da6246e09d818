mod host;
mod hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
