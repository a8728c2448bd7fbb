#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    batch_gateway::run().await
}
