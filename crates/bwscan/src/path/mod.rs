pub mod permuted;
pub mod two_hop;

pub use permuted::PermutedPairGenerator;
pub use two_hop::{TwoHopGenerator, DEFAULT_SLICE_WIDTH};

use bwscan_core::Relay;
use rand::rngs::StdRng;

/// Tagged variant over the two path-generator shapes: the Measurement
/// Orchestrator drives `Measurement`, the Partition Scanner drives
/// `Permuted`.
pub enum Generator {
    Measurement(TwoHopGenerator<StdRng>),
    Permuted(PermutedPairGenerator),
}

impl Iterator for Generator {
    type Item = (Relay, Relay);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Generator::Measurement(g) => g.next(),
            Generator::Permuted(g) => g.next(),
        }
    }
}
