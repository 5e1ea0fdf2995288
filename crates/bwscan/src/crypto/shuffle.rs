use super::prng::KeyedPrng;

/// Fisher-Yates "inside-out" shuffle: builds an output of length `n` by, for
/// each `i` in `[0, n)`, drawing `j` uniformly from `[0, i]` and setting
/// `a[i] = a[j]; a[j] = source[i]` (or just appending when `j == i`). Two
/// calls against PRNGs sharing a seed consume PRNG output in the same order
/// and so produce the same permutation.
pub fn fisher_yates_shuffle<T: Clone>(source: &[T], prng: &mut KeyedPrng) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(source.len());
    for (i, item) in source.iter().enumerate() {
        let j = prng.next_bounded(i as u64) as usize;
        if j == out.len() {
            out.push(item.clone());
        } else {
            out.push(out[j].clone());
            out[j] = item.clone();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_is_a_permutation() {
        let source: Vec<i32> = (0..50).collect();
        let mut prng = KeyedPrng::new([9u8; 32]);
        let shuffled = fisher_yates_shuffle(&source, &mut prng);
        let mut sorted = shuffled.clone();
        sorted.sort();
        assert_eq!(sorted, source);
        assert_eq!(shuffled.len(), source.len());
    }

    #[test]
    fn same_seed_same_shuffle() {
        let source: Vec<i32> = (0..30).collect();
        let mut a = KeyedPrng::new([4u8; 32]);
        let mut b = KeyedPrng::new([4u8; 32]);
        assert_eq!(
            fisher_yates_shuffle(&source, &mut a),
            fisher_yates_shuffle(&source, &mut b)
        );
    }

    #[test]
    fn empty_source_shuffles_to_empty() {
        let source: Vec<i32> = vec![];
        let mut prng = KeyedPrng::new([1u8; 32]);
        assert!(fisher_yates_shuffle(&source, &mut prng).is_empty());
    }
}
