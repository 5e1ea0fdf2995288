//! Measurement path generator: partitions the consensus, bandwidth-orders
//! each partition into slices, and pairs each relay in a slice with a
//! bandwidth-similar exit.

use bwscan_core::{ConsensusSnapshot, Relay};
use rand::seq::SliceRandom;
use rand::Rng;

pub const DEFAULT_SLICE_WIDTH: usize = 50;

pub struct TwoHopGenerator<R: Rng> {
    global_exits: Vec<Relay>,
    slices: std::collections::VecDeque<Vec<Relay>>,
    current: Option<SliceCursor>,
    slice_width: usize,
    rng: R,
}

struct SliceCursor {
    order: std::vec::IntoIter<Relay>,
    exits_in_slice: Vec<Relay>,
}

impl<R: Rng> TwoHopGenerator<R> {
    pub fn new(
        snapshot: &ConsensusSnapshot,
        partitions: usize,
        this_partition: usize,
        slice_width: usize,
        mut rng: R,
    ) -> Self {
        assert!(partitions >= 1, "partitions must be >= 1");
        assert!(
            (1..=partitions).contains(&this_partition),
            "this_partition must be in 1..=partitions"
        );

        let mut global_exits: Vec<Relay> = snapshot
            .relays
            .iter()
            .filter(|r| r.is_valid_exit())
            .cloned()
            .collect();
        global_exits.sort_by_key(|r| r.bandwidth);

        let start = this_partition - 1;
        let mut partition_relays: Vec<Relay> = snapshot
            .relays
            .iter()
            .enumerate()
            .filter(|(i, _)| i >= &start && (i - start) % partitions == 0)
            .map(|(_, r)| r.clone())
            .collect();
        partition_relays.sort_by_key(|r| r.bandwidth);

        let slice_width = slice_width.max(1);
        let mut slices = std::collections::VecDeque::new();
        for chunk in partition_relays.chunks(slice_width) {
            let mut slice: Vec<Relay> = chunk.to_vec();
            slice.shuffle(&mut rng);
            slices.push_back(slice);
        }

        Self {
            global_exits,
            slices,
            current: None,
            slice_width,
            rng,
        }
    }

    fn start_next_slice(&mut self) -> bool {
        while let Some(slice) = self.slices.pop_front() {
            let exits_in_slice: Vec<Relay> =
                slice.iter().filter(|r| r.is_valid_exit()).cloned().collect();
            if slice.is_empty() {
                continue;
            }
            self.current = Some(SliceCursor {
                order: slice.into_iter(),
                exits_in_slice,
            });
            return true;
        }
        false
    }

    /// Bandwidth-similarity fallback when a slice has no valid exit of its
    /// own: find the smallest index in the globally bandwidth-ordered exit
    /// list whose bandwidth is >= the probe's, form a window of
    /// `slice_width` exits starting there (extending downward into slower
    /// exits if the window would otherwise run off the end), drop the probe
    /// itself if present, and draw uniformly.
    fn fallback_exit(&mut self, probe: &Relay) -> Option<Relay> {
        let n = self.global_exits.len();
        if n == 0 {
            return None;
        }
        let idx = self
            .global_exits
            .iter()
            .position(|e| e.bandwidth >= probe.bandwidth)?;

        let mut start = idx;
        let mut end = (idx + self.slice_width).min(n);
        if end - start < self.slice_width {
            start = end.saturating_sub(self.slice_width);
        }

        let mut window: Vec<&Relay> = self.global_exits[start..end].iter().collect();
        window.retain(|r| r.fingerprint != probe.fingerprint);
        if window.is_empty() {
            return None;
        }
        let choice = window[self.rng.gen_range(0..window.len())];
        Some(choice.clone())
    }
}

impl<R: Rng> Iterator for TwoHopGenerator<R> {
    type Item = (Relay, Relay);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() && !self.start_next_slice() {
                return None;
            }
            let cursor = self.current.as_mut().unwrap();
            let Some(probe) = cursor.order.next() else {
                self.current = None;
                continue;
            };

            let candidates: Vec<&Relay> = cursor
                .exits_in_slice
                .iter()
                .filter(|e| e.fingerprint != probe.fingerprint)
                .collect();

            let exit = if !candidates.is_empty() {
                candidates[self.rng.gen_range(0..candidates.len())].clone()
            } else if let Some(fallback) = self.fallback_exit(&probe) {
                fallback
            } else {
                continue;
            };

            return Some((probe, exit));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn relay(fp: &str, bw: u64, exit: bool) -> Relay {
        let flags: Vec<&str> = if exit { vec!["exit"] } else { vec![] };
        Relay::new(
            fp,
            "r",
            flags.into_iter(),
            bw,
            "127.0.0.1".parse().unwrap(),
            9001,
        )
    }

    fn snapshot(n: usize, exit_every: usize) -> ConsensusSnapshot {
        let relays = (0..n)
            .map(|i| relay(&format!("{:040X}", i), (i * 10) as u64, i % exit_every == 0))
            .collect();
        ConsensusSnapshot::new(relays)
    }

    #[test]
    fn yields_each_partition_member_exactly_once() {
        let snap = snapshot(30, 3);
        let rng = StdRng::seed_from_u64(1);
        let gen = TwoHopGenerator::new(&snap, 1, 1, 10, rng);
        let pairs: Vec<_> = gen.collect();
        assert_eq!(pairs.len(), 30);
        let mut probes: Vec<_> = pairs.iter().map(|(p, _)| p.fingerprint.clone()).collect();
        probes.sort();
        probes.dedup();
        assert_eq!(probes.len(), 30);
    }

    #[test]
    fn exit_never_equals_probe() {
        let snap = snapshot(40, 2);
        let rng = StdRng::seed_from_u64(2);
        let gen = TwoHopGenerator::new(&snap, 1, 1, 5, rng);
        for (probe, exit) in gen {
            assert_ne!(probe.fingerprint, exit.fingerprint);
            assert!(exit.is_valid_exit());
        }
    }

    #[test]
    fn partitions_are_disjoint_and_cover_relays() {
        let snap = snapshot(20, 4);
        let mut seen = std::collections::HashSet::new();
        for this_partition in 1..=3 {
            let rng = StdRng::seed_from_u64(this_partition as u64);
            let gen = TwoHopGenerator::new(&snap, 3, this_partition, 5, rng);
            for (probe, _) in gen {
                assert!(seen.insert(probe.fingerprint));
            }
        }
        assert_eq!(seen.len(), 20);
    }
}
