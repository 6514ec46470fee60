//! Random password generation for new entries.

use rand::rngs::OsRng;
use rand::Rng;

use credvault_common::{Error, Result};

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{};:,.<>?/";

/// Upper bound on generated length.
pub const MAX_LENGTH: usize = 1024;

/// Generate a password of `length` characters drawn uniformly from the
/// alphanumeric set, plus punctuation when `symbols` is set.
pub fn generate_password(length: usize, symbols: bool) -> Result<String> {
    if length == 0 || length > MAX_LENGTH {
        return Err(Error::InvalidInput(format!(
            "password length must be between 1 and {}",
            MAX_LENGTH
        )));
    }

    let pool: Vec<u8> = if symbols {
        [ALPHANUMERIC, SYMBOLS].concat()
    } else {
        ALPHANUMERIC.to_vec()
    };

    let mut rng = OsRng;
    Ok((0..length)
        .map(|_| pool[rng.gen_range(0..pool.len())] as char)
        .collect())
}
