//! Short-lived signed tokens derived from request metadata and a shared
//! secret. Stateless: verification recomputes the token from the same inputs
//! rather than looking anything up.
//!
//! Two derivation modes exist and both are computed by a matching client-side
//! counterpart, so the exact byte semantics here are wire format:
//!
//! * Mode A (path-bound): a 32-bit rolling hash of
//!   `timestamp || path || secret`, rendered as 8 lowercase hex characters.
//!   NOT cryptographically strong; it deters casual tampering only. The
//!   secret ships to browsers, so this must never be treated as a boundary
//!   against an attacker who reads the client source.
//! * Mode B (frontend identity): SHA-256 of
//!   `timestamp || user_agent || secret || domain`, hex encoded. Ignores the
//!   resource path; it authenticates "this is our frontend", not one request.
//!
//! All comparisons against presented tokens are constant-time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Freshness window for Mode A path-bound tokens.
pub const PATH_TOKEN_MAX_AGE_SECS: i64 = 600;
/// Freshness window for Mode B frontend-identity hashes.
pub const FRONTEND_HASH_MAX_AGE_SECS: i64 = 300;

/// Historical transport ceiling for Mode A tokens. The 8-char digest repeated
/// 4 times never reaches it, but existing clients truncate at 64, so keep it.
const PATH_TOKEN_CEILING: usize = 64;

/// Constant-time string equality. Length differences still return false, just
/// without an early exit on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// 32-bit rolling hash: fold each byte with `acc = (acc*31 - acc) + byte`,
/// wrapping as unsigned 32-bit arithmetic after every fold.
fn rolling_hash(input: &str) -> u32 {
    let mut acc: u32 = 0;
    for &b in input.as_bytes() {
        acc = acc
            .wrapping_mul(31)
            .wrapping_sub(acc)
            .wrapping_add(b as u32);
    }
    acc
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut s, "{:02x}", b);
    }
    s
}

/// Normalize a resource path prior to signing or verifying. Signer and
/// verifier must agree on this exactly or every token spuriously fails.
///
/// Empty input falls back to the current request path; otherwise the result
/// carries a single leading `/` and no trailing `/` (except the root path).
/// Idempotent.
pub fn normalize_path(raw: &str, request_path: &str) -> String {
    let raw = raw.trim();
    let src = if raw.is_empty() { request_path.trim() } else { raw };
    let mut p = format!("/{}", src.trim_start_matches('/'));
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// Mode A: derive the published path-bound token for a timestamp string and a
/// normalized path. The timestamp participates as the exact string the client
/// sent, not its parsed value.
pub fn derive_path_token(timestamp: &str, path: &str, secret: &str) -> String {
    let digest = format!("{:08x}", rolling_hash(&format!("{timestamp}{path}{secret}")));
    let mut token = digest.repeat(4);
    token.truncate(PATH_TOKEN_CEILING);
    token
}

/// Mode A validation: non-integer timestamps and stale timestamps reject
/// before any recomputation; the final comparison is constant-time.
/// Accepts at exactly `max_age` seconds of skew, rejects beyond it.
pub fn validate_path_token(
    token: &str,
    timestamp: &str,
    path: &str,
    secret: &str,
    max_age: i64,
    now: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > max_age {
        return false;
    }
    let expected = derive_path_token(timestamp.trim(), path, secret);
    constant_time_eq(token, &expected)
}

/// Mode B: SHA-256 over `timestamp || user_agent || secret || domain`,
/// hex encoded.
pub fn derive_frontend_hash(timestamp: &str, user_agent: &str, secret: &str, domain: &str) -> String {
    let mut h = Sha256::new();
    h.update(timestamp.as_bytes());
    h.update(user_agent.as_bytes());
    h.update(secret.as_bytes());
    h.update(domain.as_bytes());
    hex_lower(&h.finalize())
}

/// Mode B validation with its own (tighter) freshness window.
pub fn validate_frontend_hash(
    hash: &str,
    timestamp: &str,
    user_agent: &str,
    secret: &str,
    domain: &str,
    now: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > FRONTEND_HASH_MAX_AGE_SECS {
        return false;
    }
    let expected = derive_frontend_hash(timestamp.trim(), user_agent, secret, domain);
    constant_time_eq(hash, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_token_is_deterministic() {
        let a = derive_path_token("1700000000", "/api/stats", "secret");
        let b = derive_path_token("1700000000", "/api/stats", "secret");
        assert_eq!(a, b);
    }

    #[test]
    fn path_token_is_sensitive_to_each_input() {
        let base = derive_path_token("1700000000", "/api/stats", "secret");
        assert_ne!(base, derive_path_token("1700000001", "/api/stats", "secret"));
        assert_ne!(base, derive_path_token("1700000000", "/api/stat", "secret"));
        assert_ne!(base, derive_path_token("1700000000", "/api/stats", "secreu"));
    }

    #[test]
    fn path_token_is_the_digest_repeated() {
        let tok = derive_path_token("1700000000", "/x", "s");
        assert_eq!(tok.len(), 32);
        let digest = &tok[..8];
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(tok, digest.repeat(4));
    }

    #[test]
    fn validate_accepts_at_window_and_rejects_past_it() {
        let now = 1_700_000_000i64;
        let ts = (now - PATH_TOKEN_MAX_AGE_SECS).to_string();
        let tok = derive_path_token(&ts, "/a", "s");
        assert!(validate_path_token(&tok, &ts, "/a", "s", PATH_TOKEN_MAX_AGE_SECS, now));
        assert!(!validate_path_token(&tok, &ts, "/a", "s", PATH_TOKEN_MAX_AGE_SECS, now + 1));
    }

    #[test]
    fn validate_rejects_future_skew_symmetrically() {
        let now = 1_700_000_000i64;
        let ts = (now + PATH_TOKEN_MAX_AGE_SECS + 1).to_string();
        let tok = derive_path_token(&ts, "/a", "s");
        assert!(!validate_path_token(&tok, &ts, "/a", "s", PATH_TOKEN_MAX_AGE_SECS, now));
    }

    #[test]
    fn validate_rejects_non_integer_timestamp() {
        assert!(!validate_path_token("deadbeef".repeat(4).as_str(), "not-a-number", "/a", "s", 600, 0));
        assert!(!validate_path_token("deadbeef".repeat(4).as_str(), "", "/a", "s", 600, 0));
    }

    #[test]
    fn validate_rejects_tampered_token() {
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let mut tok = derive_path_token(&ts, "/a", "s");
        // flip one nibble
        let last = tok.pop().unwrap();
        tok.push(if last == '0' { '1' } else { '0' });
        assert!(!validate_path_token(&tok, &ts, "/a", "s", 600, now));
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["api/stats", "/api/stats/", "//api//stats", "/", "", "  /x/  "] {
            let once = normalize_path(raw, "/req/path");
            let twice = normalize_path(&once, "/req/path");
            assert_eq!(once, twice, "raw={raw:?}");
        }
    }

    #[test]
    fn normalization_shapes_paths() {
        assert_eq!(normalize_path("api/stats", "/r"), "/api/stats");
        assert_eq!(normalize_path("/api/stats/", "/r"), "/api/stats");
        assert_eq!(normalize_path("/", "/r"), "/");
        assert_eq!(normalize_path("", "/req/path"), "/req/path");
        assert_eq!(normalize_path("", "req/path/"), "/req/path");
    }

    #[test]
    fn frontend_hash_round_trips_inside_window() {
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let h = derive_frontend_hash(&ts, "ua/1.0", "s", "farm.example");
        assert_eq!(h.len(), 64);
        assert!(validate_frontend_hash(&h, &ts, "ua/1.0", "s", "farm.example", now));
        // domain participates in the digest
        assert!(!validate_frontend_hash(&h, &ts, "ua/1.0", "s", "other.example", now));
        // 300s window, not 600
        let stale = (now - FRONTEND_HASH_MAX_AGE_SECS - 1).to_string();
        let h2 = derive_frontend_hash(&stale, "ua/1.0", "s", "farm.example");
        assert!(!validate_frontend_hash(&h2, &stale, "ua/1.0", "s", "farm.example", now));
    }

    #[test]
    fn constant_time_eq_is_equality() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("", ""));
    }
}
