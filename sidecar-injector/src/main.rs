use plugin_proto::plugin_service_server::PluginServiceServer;
use sidecar_injector::GatewayInjectorPlugin;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    documentdb_common::telemetry::init("documentdb-sidecar-injector").await;

    let addr = std::env::var("PLUGIN_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
        .parse()?;

    info!(%addr, "starting documentdb-sidecar-injector plugin server");

    Server::builder()
        .add_service(PluginServiceServer::new(GatewayInjectorPlugin))
        .serve(addr)
        .await?;

    Ok(())
}
