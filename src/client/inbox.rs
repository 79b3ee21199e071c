//! Reply-subject generation for request/reply.
//!
//! Every request gets its own unique `_INBOX.<token>` subject backed by a
//! fresh subscription; tokens come from the thread-local CSPRNG rather than a
//! sequential counter so that reply subjects can't be guessed or correlated
//! across requests by anything snooping the wire.

use rand::RngCore;

const TOKEN_BYTES: usize = 16;

/// Generates a fresh, unguessable inbox subject under the given prefix
/// (`_INBOX` unless overridden by [`crate::client::options::ClientOptions::inbox_prefix`]).
pub fn new_inbox(prefix: &str) -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = String::with_capacity(TOKEN_BYTES * 2);
    for b in bytes {
        token.push_str(&format!("{b:02x}"));
    }
    format!("{prefix}.{token}")
}
