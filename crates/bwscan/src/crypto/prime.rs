use super::prng::KeyedPrng;

/// Draw a 42-bit-or-larger prime from the PRNG, for use as the stride in the
/// permuted-pair generator. A 42-bit floor keeps the stride large relative
/// to any realistic relay count so the visiting order looks unrelated to
/// the shuffle order.
pub fn pick_prime(prng: &mut KeyedPrng) -> u64 {
    const FLOOR: u64 = 1 << 42;
    let mut candidate = prng.next_bounded(FLOOR);
    candidate += FLOOR;
    // round up to the nearest odd number
    if candidate % 2 == 0 {
        candidate += 1;
    }
    loop {
        candidate += 2;
        if is_prime_by_trial_division(candidate) {
            return candidate;
        }
    }
}

fn is_prime_by_trial_division(candidate: u64) -> bool {
    if candidate < 2 {
        return false;
    }
    if candidate % 2 == 0 {
        return candidate == 2;
    }
    let limit = (candidate as f64).sqrt() as u64 + 1;
    let mut divisor = 3;
    while divisor <= limit {
        if candidate % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picked_value_is_prime_and_large() {
        let mut prng = KeyedPrng::new([11u8; 32]);
        let prime = pick_prime(&mut prng);
        assert!(prime > 1 << 42);
        assert!(is_prime_by_trial_division(prime));
    }

    #[test]
    fn trial_division_matches_known_values() {
        assert!(is_prime_by_trial_division(2));
        assert!(is_prime_by_trial_division(97));
        assert!(!is_prime_by_trial_division(91)); // 7 * 13
        assert!(!is_prime_by_trial_division(1));
    }
}
