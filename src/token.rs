// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session token and artifact name generation.
//!
//! Tokens are capability-bearing: whoever holds one can drive the session.
//! They are drawn from the operating system CSPRNG over a lowercase
//! alphanumeric alphabet, 16 characters long (~82 bits of entropy).

use rand::rngs::OsRng;
use rand::Rng;

/// Alphabet shared by session tokens and artifact file names.
pub const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Fixed token length.
pub const TOKEN_LENGTH: usize = 16;

/// Generate a random string of `len` characters over [`TOKEN_ALPHABET`].
pub fn random_string(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Generate a new session token.
pub fn generate() -> String {
    random_string(TOKEN_LENGTH)
}

/// Check that a string has the shape of a generated token.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        for _ in 0..100 {
            let token = generate();
            assert_eq!(token.len(), TOKEN_LENGTH);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            assert!(is_well_formed(&token));
        }
    }

    #[test]
    fn test_tokens_unique_over_ten_thousand_draws() {
        let tokens: HashSet<String> = (0..10_000).map(|_| generate()).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_random_string_length() {
        assert_eq!(random_string(8).len(), 8);
        assert_eq!(random_string(0), "");
    }

    #[test]
    fn test_is_well_formed_rejects_bad_input() {
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed("ABCDEFGHIJKLMNOP"));
        assert!(!is_well_formed("abcdefghijklmn-p"));
    }
}
