//! Test doubles and fixtures for exercising the engine without hardware

pub mod fixtures;
pub mod mock_transport;
#[cfg(test)]
mod tests;

pub use fixtures::{image_dir, numbered_images};
pub use mock_transport::{
    MockDeviceBehavior, MockFailure, MockTransport, RecordedPlay, mock_credentials, mock_device,
};

/// Install a `tracing` subscriber once, honouring `RUST_LOG`
///
/// Only available with the `tracing-subscriber` dev-dependency, i.e. from
/// this crate's own tests.
#[cfg(test)]
pub(crate) fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
