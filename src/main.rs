#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamcap_lib::run().await
}
