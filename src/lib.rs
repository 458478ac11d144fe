pub mod app;
pub mod config;
pub mod forward;
pub mod icon;
pub mod kubernetes;

pub use app::PortholeApp;
pub use config::EngineConfig;
pub use forward::{Endpoint, SessionState};
pub use icon::{Icon, IconResolver};
pub use kubernetes::{ForwardablePair, TunnelSession, ALL_NAMESPACES};
