use rand::Rng;

use crate::error::{Result, SlideshowError};

/// Digits in a pairing PIN
pub const PIN_LENGTH: usize = 4;

/// Check that a PIN is exactly four ASCII digits
///
/// # Errors
///
/// Returns a `Validation` error otherwise.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(SlideshowError::validation(format!(
            "PIN must be exactly {PIN_LENGTH} digits"
        )))
    }
}

/// Generate a zero-padded four digit PIN
#[must_use]
pub fn generate_pin() -> String {
    let value: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{value:04}")
}
