#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    syncagent::run_cli().await
}
