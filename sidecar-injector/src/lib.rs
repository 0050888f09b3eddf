pub mod patch;
pub mod service;

pub use service::GatewayInjectorPlugin;
