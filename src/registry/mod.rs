//! Device registry and connection state machine

mod reconnect;
#[allow(clippy::module_inception)]
mod registry;
mod state;

pub use reconnect::ReconnectPolicy;
pub use registry::{ConnectResolution, ConnectStart, DeviceRegistry};
pub use state::{Device, DeviceState, StateChange};
