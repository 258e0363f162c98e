#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tempstream_lib::run().await
}
