pub mod client;
pub mod detect;
pub mod snapshot;
pub mod watcher;

/// Default user agent for nswatch - automatically uses the package version
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
