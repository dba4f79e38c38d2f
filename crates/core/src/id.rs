//! Identifier and mutation token generation.
//!
//! Both draw from the 62-symbol alphabet `[A-Za-z0-9]` using the thread-local
//! CSPRNG. Identifiers are additionally checked against storage by the caller;
//! tokens are never looked up, so they are not.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Path segments served by fixed routes. A generated id must never shadow them.
pub const RESERVED_IDS: &[&str] = &["delete", "public", "health", "metrics"];

/// Draw `length` random alphanumeric characters.
fn random_alphanumeric(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a candidate record identifier.
///
/// The result is not checked for collisions; callers retry until storage
/// reports the candidate as unused. Reserved route names are never returned.
pub fn generate_id(length: usize) -> String {
    loop {
        let id = random_alphanumeric(length);
        if !is_reserved(&id) {
            return id;
        }
    }
}

/// Generate a secret mutation token.
pub fn generate_token(length: usize) -> String {
    random_alphanumeric(length)
}

/// Check whether `id` is a well-formed record identifier.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Check whether `id` collides with a fixed route name.
pub fn is_reserved(id: &str) -> bool {
    RESERVED_IDS.contains(&id)
}
