pub mod resources;
pub mod service;

pub use service::WalReceiverPlugin;
