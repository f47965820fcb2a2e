#[tokio::main]
async fn main() -> anyhow::Result<()> {
    provenance_ledger::server::run().await
}
