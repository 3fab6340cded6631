#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liftlearn_lib::run().await
}
