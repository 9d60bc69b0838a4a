//! Rarest-first ordering.

use std::collections::BTreeMap;

use super::{PickResult, PiecePicker};
use crate::torrent::{BitField, PeerView};

/// Offers the inner picker the least replicated pieces first.
///
/// Candidates are grouped by how many other peers hold them and each group is
/// tried in ascending order of that count. Seeders are skipped while counting
/// since they hold every piece and cannot change the ordering.
pub struct RarestFirstPicker<P> {
    inner: P,
}

impl<P: PiecePicker> RarestFirstPicker<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut P {
        &mut self.inner
    }
}

/// Splits the candidates in `[start, end]` into availability classes keyed by
/// the number of other peers holding each piece.
fn availability_classes(
    available: &BitField,
    other_peers: &[&dyn PeerView],
    start: u32,
    end: u32,
) -> BTreeMap<usize, BitField> {
    let partial_peers: Vec<&BitField> = other_peers
        .iter()
        .map(|peer| peer.bitfield())
        .filter(|bitfield| !bitfield.all_true())
        .collect();

    let mut classes: BTreeMap<usize, BitField> = BTreeMap::new();
    for index in available.iter_ones() {
        if index < start || index > end {
            continue;
        }
        let holders = partial_peers
            .iter()
            .filter(|bitfield| bitfield.get(index))
            .count();
        classes
            .entry(holders)
            .or_insert_with(|| BitField::new(available.len()))
            .set(index, true);
    }
    classes
}

impl<P: PiecePicker> PiecePicker for RarestFirstPicker<P> {
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

        let classes = availability_classes(available, other_peers, start, end);
        if classes.is_empty() {
            return self
                .inner
                .pick_piece(peer, available, other_peers, count, start, end);
        }

        for (holders, candidates) in classes {
            let result = self
                .inner
                .pick_piece(peer, &candidates, other_peers, count, start, end);
            if result.is_requests() {
                tracing::trace!(holders, "picked from availability class");
                return result;
            }
        }
        PickResult::NoneAvailable
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::StandardConfig;
    use crate::observer::RecordingObserver;
    use crate::picker::StandardPicker;
    use crate::torrent::{BLOCK_SIZE, PeerId, PeerState, TorrentLayout};

    fn picker(pieces: u32) -> RarestFirstPicker<StandardPicker> {
        let layout =
            TorrentLayout::single_file("f", BLOCK_SIZE, u64::from(BLOCK_SIZE) * u64::from(pieces))
                .unwrap();
        let mut base = StandardPicker::new(
            StandardConfig::default(),
            Arc::new(RecordingObserver::new()),
        );
        base.initialise(&BitField::new(pieces), &layout, Vec::new())
            .unwrap();
        RarestFirstPicker::new(base)
    }

    #[test]
    fn test_classes_count_partial_peers_only() {
        let available = BitField::full(6);
        let a = PeerState::new(PeerId::from_seed(1), BitField::from_indices(6, [0, 1, 2]));
        let b = PeerState::new(PeerId::from_seed(2), BitField::from_indices(6, [0, 1]));
        let seeder = PeerState::new(PeerId::from_seed(3), BitField::full(6));
        let others: Vec<&dyn PeerView> = vec![&a, &b, &seeder];

        let classes = availability_classes(&available, &others, 1, 4);
        let summary: Vec<(usize, Vec<u32>)> = classes
            .iter()
            .map(|(holders, pieces)| (*holders, pieces.iter_ones().collect()))
            .collect();
        assert_eq!(summary, vec![(0, vec![3, 4]), (1, vec![2]), (2, vec![1])]);
    }

    #[test]
    fn test_rarest_piece_requested_first() {
        let mut picker = picker(4);
        let mut peer = PeerState::new(PeerId::from_seed(9), BitField::full(4));
        let a = PeerState::new(PeerId::from_seed(1), BitField::from_indices(4, [0, 1, 3]));
        let b = PeerState::new(PeerId::from_seed(2), BitField::from_indices(4, [0, 1, 2]));
        let c = PeerState::new(PeerId::from_seed(3), BitField::from_indices(4, [0, 2]));
        let others: Vec<&dyn PeerView> = vec![&a, &b, &c];
        let available = BitField::full(4);

        let order: Vec<u32> = (0..4)
            .map(|_| {
                picker.pick_piece(&mut peer, &available, &others, 1, 0, 3).into_requests()[0]
                    .piece_index
                    .as_u32()
            })
            .collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_nothing_available() {
        let mut picker = picker(4);
        let mut peer = PeerState::new(PeerId::from_seed(9), BitField::new(4));
        let available = BitField::new(4);
        let result = picker.pick_piece(&mut peer, &available, &[], 1, 0, 3);
        assert_eq!(result, PickResult::NoneAvailable);
    }

    #[test]
    fn test_out_of_range_candidates_forwarded_as_is() {
        let mut picker = picker(8);
        let mut peer = PeerState::new(PeerId::from_seed(9), BitField::full(8));
        let available = BitField::from_indices(8, [6, 7]);
        let result = picker.pick_piece(&mut peer, &available, &[], 1, 0, 3);
        assert_eq!(result, PickResult::NoneAvailable);
        assert_eq!(picker.get_ref().current_request_count(), 0);
    }
}
