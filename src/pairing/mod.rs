//! PIN pairing sessions
//!
//! The manager only tracks sessions; the engine runs the device exchange in
//! background tasks and feeds the answers back in, tagged with the session
//! generation so late answers never reach a newer session.

mod manager;
mod pin;
mod session;

pub use manager::{Opened, PairingManager, PinCheck, Verified, VerifyResult};
pub use pin::{PIN_LENGTH, generate_pin, validate_pin};
pub use session::{PairingPhase, PairingSession, PairingStatus};
