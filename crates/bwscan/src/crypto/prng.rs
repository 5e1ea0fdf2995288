//! Deterministic, seekable byte stream keyed by a 32-byte seed.
//!
//! The stream is the concatenation of keyed hashes of an increasing
//! generation counter: generation `g` yields 32 bytes equal to
//! `PBKDF2-HMAC-SHA256(password = seed, salt = decimal(g), iterations = 1)`;
//! logical byte index `i` selects `current[g].bytes[i mod 32]` where
//! `g = i div 32`. Treat the seed as a public coordination value, not a
//! secret: a single PBKDF2 iteration provides no stretching, it is only a
//! labeled KDF used so independent scanners agree byte-for-byte.

const HASH_OUTPUT_LEN: usize = 32;

/// A keyed, deterministic byte stream. Two `KeyedPrng`s constructed with the
/// same seed produce identical output regardless of process or host.
pub struct KeyedPrng {
    seed: [u8; 32],
    stream_index: u64,
}

impl KeyedPrng {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            stream_index: 0,
        }
    }

    fn generation_block(&self, generation: u64) -> [u8; HASH_OUTPUT_LEN] {
        let salt = generation.to_string();
        let mut out = [0u8; HASH_OUTPUT_LEN];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(&self.seed, salt.as_bytes(), 1, &mut out);
        out
    }

    /// Return `length` bytes and advance the logical index by `length`.
    pub fn next_bytes(&mut self, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        let mut index = self.stream_index;
        while out.len() < length {
            let generation = index / HASH_OUTPUT_LEN as u64;
            let byte_offset = (index % HASH_OUTPUT_LEN as u64) as usize;
            let block = self.generation_block(generation);
            let take = (HASH_OUTPUT_LEN - byte_offset).min(length - out.len());
            out.extend_from_slice(&block[byte_offset..byte_offset + take]);
            index += take as u64;
        }
        self.stream_index += length as u64;
        out
    }

    /// Draw a value in `[0, maximum]` inclusive, uniformly, using rejection
    /// sampling to eliminate modulo bias. Reads the smallest number of bytes
    /// that can represent `maximum` (`ceil(log256(1 + maximum))`), accepting
    /// a value only when it falls inside an exact multiple of the sample
    /// space, or outright when the byte width evenly divides the space (the
    /// "biased fallback" the spec allows at the smallest width).
    pub fn next_bounded(&mut self, maximum: u64) -> u64 {
        if maximum == 0 {
            return 0;
        }
        let bytes_needed = bytes_needed_for(maximum);
        let modulus: u128 = 256u128.pow(bytes_needed as u32);
        loop {
            let raw = self.next_bytes(bytes_needed);
            let word = be_bytes_to_u128(&raw);
            if word <= maximum as u128 || (maximum as u128 + 1) % modulus == 0 {
                return (word % (maximum as u128 + 1)) as u64;
            }
        }
    }
}

fn bytes_needed_for(maximum: u64) -> usize {
    let space = maximum as u128 + 1;
    let mut bytes = 1usize;
    let mut capacity: u128 = 256;
    while capacity < space {
        bytes += 1;
        capacity = capacity.saturating_mul(256);
    }
    bytes
}

fn be_bytes_to_u128(bytes: &[u8]) -> u128 {
    let mut value: u128 = 0;
    for b in bytes {
        value = (value << 8) | *b as u128;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_seed_produces_identical_stream() {
        let seed = [7u8; 32];
        let mut a = KeyedPrng::new(seed);
        let mut b = KeyedPrng::new(seed);
        assert_eq!(a.next_bytes(100), b.next_bytes(100));
        assert_eq!(a.next_bounded(1000), b.next_bounded(1000));
    }

    #[test]
    fn next_bytes_advances_logical_index() {
        let seed = [1u8; 32];
        let mut prng = KeyedPrng::new(seed);
        let first = prng.next_bytes(40);
        let mut fresh = KeyedPrng::new(seed);
        let whole = fresh.next_bytes(40);
        assert_eq!(first, whole);
    }

    #[test]
    fn bounded_draw_stays_in_range() {
        let mut prng = KeyedPrng::new([42u8; 32]);
        for _ in 0..200 {
            let v = prng.next_bounded(5);
            assert!(v <= 5);
        }
    }

    #[test]
    fn bounded_zero_is_always_zero() {
        let mut prng = KeyedPrng::new([3u8; 32]);
        assert_eq!(prng.next_bounded(0), 0);
    }
}
