//! Engine task, its async handle and the blocking bridge
//!
//! [`EngineHandle::spawn`] starts one task that owns every piece of mutable
//! state (device registry, pairing sessions, slideshow session). Handles send
//! it commands and wait for the answer; long-running work (connects, pairing
//! exchanges, content delivery) runs in tasks spawned by the engine and is
//! folded back into its state when it completes. Events are published on a
//! broadcast bus and the latest [`StatusSnapshot`](crate::state::StatusSnapshot)
//! on a watch channel.
//!
//! [`Bridge`] wraps a handle for synchronous callers.

mod actor;
mod bridge;
mod command;
mod handle;


pub use bridge::Bridge;
pub use command::PairingStart;
pub use handle::EngineHandle;
