//! Random data for clients (`Rand`, `RandPassword`).

use crate::crypto;
use crate::error::{Result, ServiceError};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Largest `Rand` request.
pub const MAX_RAND_BYTES: usize = 4096;

/// Shortest password `RandPassword` will generate.
pub const MIN_PASSWORD_LENGTH: usize = 16;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+";

/// Output encoding for random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Lowercase hex.
    #[default]
    Hex,
    /// Standard base64.
    Base64,
    /// Base62 (alphanumeric).
    Base62,
}

/// `num_bytes` random bytes, encoded.
///
/// `no_padding` drops base64 padding. `lowercase` is only valid for hex,
/// which is lowercase already.
pub fn rand(
    num_bytes: usize,
    encoding: Encoding,
    no_padding: bool,
    lowercase: bool,
) -> Result<String> {
    if num_bytes == 0 || num_bytes > MAX_RAND_BYTES {
        return Err(ServiceError::InvalidRequest(format!(
            "num_bytes must be between 1 and {}",
            MAX_RAND_BYTES
        )));
    }
    if lowercase && encoding != Encoding::Hex {
        return Err(ServiceError::InvalidRequest(
            "lowercase is only supported for hex".into(),
        ));
    }

    let bytes = crypto::random_vec(num_bytes)?;
    Ok(match encoding {
        Encoding::Hex => hex::encode(&bytes),
        Encoding::Base64 if no_padding => STANDARD_NO_PAD.encode(&bytes),
        Encoding::Base64 => STANDARD.encode(&bytes),
        Encoding::Base62 => hush_core::base62::encode(&bytes),
    })
}

/// A random password of `length` characters.
pub fn rand_password(length: usize) -> Result<String> {
    if length < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::InvalidRequest("invalid length".into()));
    }

    // Rejection sampling keeps every character equally likely.
    let limit = 256 - (256 % PASSWORD_ALPHABET.len());
    let mut password = String::with_capacity(length);
    while password.len() < length {
        for b in crypto::random_vec(length)? {
            if (b as usize) < limit && password.len() < length {
                password.push(PASSWORD_ALPHABET[b as usize % PASSWORD_ALPHABET.len()] as char);
            }
        }
    }
    Ok(password)
}
