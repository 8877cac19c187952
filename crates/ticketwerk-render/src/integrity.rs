// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload fingerprints: SHA-256 over the canonical JSON form.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint of an order payload.
///
/// Object keys serialise in sorted order, so two payloads that differ only
/// in key order hash the same.
pub fn payload_hash(payload: &Value) -> String {
    hash_bytes(payload.to_string().as_bytes())
}
