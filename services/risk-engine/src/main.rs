#[tokio::main]
async fn main() -> anyhow::Result<()> {
    risk_engine::run().await
}
