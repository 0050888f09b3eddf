//! Generated client/server stubs for the plugin wire protocol shared by
//! the gateway-sidecar and wal-receiver processes.

tonic::include_proto!("documentdb.cnpgi.v1");
