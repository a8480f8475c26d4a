//! Session code generation.
//!
//! Codes are four decimal digits (1000–9999) so a person can read one off a
//! screen and type it on a phone. The space is small on purpose, which makes
//! collisions against live sessions a normal event: the generator retries a
//! bounded number of times and reports exhaustion instead of looping forever.

use rand::Rng;

/// Lowest code in the space (inclusive).
pub const CODE_MIN: u16 = 1000;

/// Highest code in the space (inclusive). 9000 possible values.
pub const CODE_MAX: u16 = 9999;

const MAX_ATTEMPTS: u32 = 100;

/// The generator could not find an unused code within its attempt cap.
/// Fatal only for the one connection attempt that triggered it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("no unused session code found after {MAX_ATTEMPTS} attempts")]
pub struct CodeSpaceExhausted;

/// Draw an unused code uniformly at random. `is_live` reports whether a code
/// currently belongs to a registered session; codes are reusable as soon as
/// their session is destroyed.
pub fn generate<R, F>(rng: &mut R, is_live: F) -> Result<String, CodeSpaceExhausted>
where
    R: Rng,
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_ATTEMPTS {
        let code = rng.gen_range(CODE_MIN..=CODE_MAX).to_string();
        if !is_live(&code) {
            return Ok(code);
        }
    }
    Err(CodeSpaceExhausted)
}
