//! Random starting point for piece searches.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{PickResult, PiecePicker};
use crate::config::RandomisedConfig;
use crate::torrent::{BitField, PeerView};

/// Splits each search range at a random midpoint and searches the upper half
/// first, then the lower half.
///
/// The inner picker scans left to right, so without this many peers offered
/// the same candidates converge on the same lowest piece index.
pub struct RandomisedPicker<P, R = ChaCha8Rng> {
    inner: P,
    rng: R,
}

impl<P: PiecePicker> RandomisedPicker<P> {
    /// Creates picker seeded from `config`, or from OS entropy when no seed
    /// is configured.
    pub fn new(inner: P, config: &RandomisedConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        tracing::debug!(seed, "randomised picker seeded");
        Self::with_rng(inner, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<P: PiecePicker, R: Rng + Send> RandomisedPicker<P, R> {
    /// Creates picker drawing midpoints from `rng`.
    pub fn with_rng(inner: P, rng: R) -> Self {
        Self { inner, rng }
    }

    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut P {
        &mut self.inner
    }
}

impl<P: PiecePicker, R: Rng + Send> PiecePicker for RandomisedPicker<P, R> {
    fn inner(&self) -> Option<&dyn PiecePicker> {
        Some(&self.inner)
    }

    fn inner_mut(&mut self) -> Option<&mut dyn PiecePicker> {
        Some(&mut self.inner)
    }

    fn pick_piece(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        other_peers: &[&dyn PeerView],
        count: usize,
        start: u32,
        end: u32,
    ) -> PickResult {
        if available.all_false() {
            return PickResult::NoneAvailable;
        }

        let end = end.min(available.len() - 1);
        if start >= end {
            return self
                .inner
                .pick_piece(peer, available, other_peers, count, start, end);
        }

        let midpoint = self.rng.random_range(start..=end);
        let upper = self
            .inner
            .pick_piece(peer, available, other_peers, count, midpoint, end);
        if upper.is_requests() || midpoint == start {
            return upper;
        }
        self.inner
            .pick_piece(peer, available, other_peers, count, start, midpoint - 1)
    }
}
