#[tokio::main]
async fn main() -> anyhow::Result<()> {
    inference_gateway::run().await
}
