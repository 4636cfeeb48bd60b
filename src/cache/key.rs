// src/cache/key.rs
//! The cache key function.
//!
//! Options are resolved (defaults filled in) before they are fingerprinted,
//! so a request that spells out a default and one that omits it share a key.
//! The canonical form is a fixed-order, length-prefixed string; its SHA-256
//! digest is the key.

use quire_types::{CacheKey, GenerationRequest, ResolvedOptions};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Bumped whenever the canonical form changes, so old entries stop matching.
const FINGERPRINT_VERSION: u32 = 1;

fn canonical(request: &GenerationRequest) -> String {
    let id = request.proposal_id.as_str();
    let ResolvedOptions {
        method,
        quality,
        margins,
        include_toc,
        header_footer,
        orientation,
    } = request.options;

    let mut out = String::with_capacity(160 + id.len());
    let _ = write!(
        out,
        "v{}|proposal={}:{}|method={:?}|quality={:?}|margins={},{},{},{}|toc={}|header_footer={}|orientation={:?}",
        FINGERPRINT_VERSION,
        id.len(),
        id,
        method,
        quality,
        margins.top,
        margins.right,
        margins.bottom,
        margins.left,
        include_toc,
        header_footer,
        orientation,
    );
    out
}

/// Derives the cache key of a request. Pure: equal requests always yield
/// equal keys.
pub fn cache_key(request: &GenerationRequest) -> CacheKey {
    let digest = Sha256::digest(canonical(request).as_bytes());
    CacheKey::from_digest(hex::encode(digest))
}
