use kube::Client;
use plugin_proto::plugin_service_server::PluginServiceServer;
use tonic::transport::Server;
use tracing::info;
use wal_receiver::WalReceiverPlugin;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    documentdb_common::telemetry::init("documentdb-wal-receiver").await;

    let client = Client::try_default().await?;

    let addr = std::env::var("PLUGIN_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9091".to_string())
        .parse()?;

    info!(%addr, "starting documentdb-wal-receiver plugin server");

    Server::builder()
        .add_service(PluginServiceServer::new(WalReceiverPlugin::new(client)))
        .serve(addr)
        .await?;

    Ok(())
}
