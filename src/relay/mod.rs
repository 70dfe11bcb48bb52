pub mod address;
pub mod client;
pub mod codec;
pub mod config;
pub mod directory;
pub mod event;
pub mod federation;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod wire;
