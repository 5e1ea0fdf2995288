use super::sha256;

/// Derive the shared PRNG seed cooperating scanners use to agree on
/// partitioning.
///
/// `consensus_digest_input` is the comma-joined, trailing-comma-included,
/// uppercase fingerprints of the consensus snapshot
/// ([`bwscan_core::ConsensusSnapshot::fingerprint_digest_input`]);
/// `shared_secret` is the site-specific secret all cooperating scanners are
/// configured with out of band.
///
/// `seed = PBKDF2-HMAC-SHA256(password = SHA256(consensus_digest_input), salt = SHA256(shared_secret), iterations = 1, dklen = 32)`.
///
/// This seed is a public coordination beacon, not a credential: a single
/// PBKDF2 iteration provides no meaningful stretching. It is safe to log
/// and to pass around in cleartext.
pub fn derive_seed(consensus_digest_input: &str, shared_secret: &[u8]) -> [u8; 32] {
    let c = sha256(consensus_digest_input.as_bytes());
    let s = sha256(shared_secret);
    let mut seed = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(&c, &s, 1, &mut seed);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = derive_seed("A,B,C,", b"shared secret");
        let b = derive_seed("A,B,C,", b"shared secret");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_on_consensus_change() {
        let a = derive_seed("A,B,C,", b"shared secret");
        let b = derive_seed("A,B,D,", b"shared secret");
        assert_ne!(a, b);
    }

    #[test]
    fn matches_scenario_s3_inputs() {
        // Seed derivation over a placeholder consensus hash and shared
        // secret. We only assert the derivation is stable and 32 bytes; the
        // literal placeholder strings are not a published test vector.
        let seed = derive_seed("REPLACEME consensus hash", b"REPLACEME shared secret");
        assert_eq!(seed.len(), 32);
    }
}
