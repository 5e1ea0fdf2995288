//! Permuted-pair generator: a reproducible, partition-aware enumeration of
//! the full set of ordered two-hop pairs, used for connectivity/partition
//! probing across multiple cooperating scanners.

use std::collections::VecDeque;

use bwscan_core::Relay;

use crate::crypto::{fisher_yates_shuffle, pick_prime, KeyedPrng};

pub struct PermutedPairGenerator {
    s0: Vec<Relay>,
    s1: Vec<Relay>,
    n: u64,
    elements: u64,
    prime: u64,
    partitions: u64,
    this_partition: u64,
    prng: KeyedPrng,
    idx: u64,
    offset: u64,
    set_size: u64,
    buffer: Vec<u64>,
    output: VecDeque<(Relay, Relay)>,
    done: bool,
}

impl PermutedPairGenerator {
    /// `this_partition` is 0-indexed, `partitions` is the total partition
    /// count, `seed` is the 32-byte PRNG seed derived per
    /// [`crate::crypto::derive_seed`].
    pub fn new(relays: &[Relay], partitions: usize, this_partition: usize, seed: [u8; 32]) -> Self {
        assert!(partitions >= 1);
        assert!(this_partition < partitions);

        let mut prng = KeyedPrng::new(seed);
        let n = relays.len() as u64;
        let s0 = fisher_yates_shuffle(relays, &mut prng);
        let s1 = fisher_yates_shuffle(relays, &mut prng);
        let elements = n * n;
        let prime = pick_prime(&mut prng);
        debug_assert!(elements == 0 || prime > elements);

        Self {
            s0,
            s1,
            n,
            elements,
            prime,
            partitions: partitions as u64,
            this_partition: this_partition as u64,
            prng,
            idx: 0,
            offset: 0,
            set_size: 1,
            buffer: Vec::new(),
            output: VecDeque::new(),
            done: elements == 0,
        }
    }

    fn process_batch(&mut self) {
        let shuffled = fisher_yates_shuffle(&self.buffer, &mut self.prng);
        let mut unique: u64 = 0;
        for k in shuffled {
            let a = (k % self.n) as usize;
            let b = (k / self.n) as usize;
            let x = &self.s0[a];
            let y = &self.s1[b];
            if x.fingerprint == y.fingerprint {
                continue;
            }
            unique += 1;
            if unique % self.partitions == self.this_partition {
                self.output.push_back((x.clone(), y.clone()));
            }
        }
        self.buffer.clear();

        let lo = 100 + self.partitions;
        let span = 255; // [100+partitions, 355+partitions] inclusive
        self.set_size = lo + self.prng.next_bounded(span);
    }
}

impl Iterator for PermutedPairGenerator {
    type Item = (Relay, Relay);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.output.pop_front() {
                return Some(pair);
            }
            if self.done {
                return None;
            }
            if self.offset >= self.elements {
                self.done = true;
                continue;
            }

            self.buffer.push(self.idx);
            self.idx = (self.idx + self.prime) % self.elements;
            self.offset += 1;

            if self.offset % self.set_size == 0 || self.offset == self.elements {
                self.process_batch();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn relays(n: usize) -> Vec<Relay> {
        (0..n)
            .map(|i| {
                Relay::new(
                    format!("{:040X}", i),
                    "r",
                    std::iter::empty::<String>(),
                    (i * 10) as u64,
                    "127.0.0.1".parse().unwrap(),
                    9001,
                )
            })
            .collect()
    }

    fn union_len(n: usize, partitions: usize, seed: [u8; 32]) -> (usize, bool) {
        let relays = relays(n);
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut disjoint = true;
        let mut per_partition_seen: Vec<HashSet<(String, String)>> =
            vec![HashSet::new(); partitions];

        for this_partition in 0..partitions {
            let gen = PermutedPairGenerator::new(&relays, partitions, this_partition, seed);
            for (x, y) in gen {
                let key = (x.fingerprint.clone(), y.fingerprint.clone());
                assert_ne!(x.fingerprint, y.fingerprint);
                if !per_partition_seen[this_partition].insert(key.clone()) {
                    disjoint = false;
                }
                seen.insert(key);
            }
        }
        (seen.len(), disjoint)
    }

    #[test]
    fn scenario_s3_small_consensus_shuffle_partitioning() {
        let seed = [5u8; 32];
        let (len, disjoint) = union_len(5, 3, seed);
        assert_eq!(len, 5 * 4);
        assert!(disjoint);
    }

    #[test]
    fn scenario_s4_larger_shuffle() {
        let seed = [6u8; 32];
        let (len, _) = union_len(80, 4, seed);
        assert_eq!(len, 80 * 79);
    }

    #[test]
    fn scenario_s6_single_partition_terminates() {
        let relays = relays(5);
        let gen = PermutedPairGenerator::new(&relays, 1, 0, [9u8; 32]);
        let pairs: Vec<_> = gen.collect();
        assert_eq!(pairs.len(), 20);
    }

    #[test]
    fn deterministic_across_instances() {
        let relays = relays(10);
        let a: Vec<_> = PermutedPairGenerator::new(&relays, 2, 0, [1u8; 32])
            .map(|(x, y)| (x.fingerprint, y.fingerprint))
            .collect();
        let b: Vec<_> = PermutedPairGenerator::new(&relays, 2, 0, [1u8; 32])
            .map(|(x, y)| (x.fingerprint, y.fingerprint))
            .collect();
        assert_eq!(a, b);
    }
}
