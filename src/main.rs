#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rfid_ledger::server::run().await
}
