//! One-time code generation and Argon2id hashing.
//!
//! Codes are 6 ASCII digits drawn uniformly from the thread-local
//! CSPRNG. Only the salted hash is ever persisted; verification parses
//! the cost parameters back out of the stored PHC string.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::Rng;

use crate::config::CodeHashParams;
use crate::error::ChallengeError;

/// Number of digits in a one-time code.
pub const CODE_LENGTH: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Generate a fresh numeric code, zero-padded to [`CODE_LENGTH`].
pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..CODE_SPACE);
    format!("{n:0width$}", width = CODE_LENGTH)
}

/// Whether `code` has the shape of a delivered code. Anything else is
/// treated as a wrong code without touching the hash.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

fn peppered(code: &str, pepper: Option<&str>) -> String {
    match pepper {
        Some(p) => format!("{p}{code}"),
        None => code.to_string(),
    }
}

/// Hash a code with Argon2id and a random per-code salt.
pub fn hash_code(
    code: &str,
    pepper: Option<&str>,
    params: &CodeHashParams,
) -> Result<String, ChallengeError> {
    let params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        None,
    )
    .map_err(|e| ChallengeError::Crypto(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = argon2
        .hash_password(peppered(code, pepper).as_bytes(), &salt)
        .map_err(|e| ChallengeError::Crypto(format!("code hash: {e}")))?;

    Ok(hash.to_string())
}

/// Check a submitted code against a stored hash.
///
/// Returns `Ok(false)` on mismatch and `Err` only when the stored hash
/// is malformed.
pub fn verify_code(code: &str, hash: &str, pepper: Option<&str>) -> Result<bool, ChallengeError> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| ChallengeError::Crypto(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(peppered(code, pepper).as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(ChallengeError::Crypto(format!("verify error: {e}"))),
    }
}
