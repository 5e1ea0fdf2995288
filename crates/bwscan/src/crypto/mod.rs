pub mod prime;
pub mod prng;
pub mod seed;
pub mod shuffle;

pub use prime::pick_prime;
pub use prng::KeyedPrng;
pub use seed::derive_seed;
pub use shuffle::fisher_yates_shuffle;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
