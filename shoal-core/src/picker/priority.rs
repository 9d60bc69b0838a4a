//! File-priority filtering.

use super::{PickResult, PickerError, PiecePicker};
use crate::torrent::{BitField, PeerView, Piece, Priority, TorrentLayout};

/// Pieces covered by one file, with that file's current priority.
#[derive(Debug, Clone)]
struct FileSelector {
    priority: Priority,
    pieces: BitField,
}

/// Offers the inner picker the pieces of the highest-priority files first.
///
/// Files sharing a priority are offered together, as the union of their
/// piece ranges. Pieces that belong only to `DoNotDownload` files are never
/// offered.
pub struct PriorityPicker<P> {
    inner: P,
    files: Vec<FileSelector>,
}

impl<P: PiecePicker> PriorityPicker<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            files: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    /// Priority groups in descending priority order, each as the union of its
    /// files' pieces.
    fn priority_groups(&self, piece_count: u32) -> Vec<(Priority, BitField)> {
        let mut groups: Vec<(Priority, BitField)> = Vec::new();
        for file in &self.files {
            match groups.iter_mut().find(|(priority, _)| *priority == file.priority) {
                Some((_, pieces)) => pieces.union_with(&file.pieces),
                None => {
                    let mut pieces = BitField::new(piece_count);
                    pieces.union_with(&file.pieces);
                    groups.push((file.priority, pieces));
                }
            }
        }
        groups.sort_by(|a, b| b.0.cmp(&a.0));
        groups
    }

    /// Pieces belonging to at least one file that should be downloaded.
    fn wanted_pieces(&self, piece_count: u32) -> BitField {
        let mut wanted = BitField::new(piece_count);
        for file in &self.files {
            if file.priority != Priority::DoNotDownload {
                wanted.union_with(&file.pieces);
            }
        }
        wanted
    }
}

impl<P: PiecePicker> PiecePicker for PriorityPicker<P> {
    fn inner(&self) -> Option<&dyn PiecePicker> {
        Some(&self.inner)
    }

    fn inner_mut(&mut self) -> Option<&mut dyn PiecePicker> {
        Some(&mut self.inner)
    }

    fn initialise(
        &mut self,
        own_pieces: &BitField,
        layout: &TorrentLayout,
        requests: Vec<Piece>,
    ) -> Result<(), PickerError> {
        let piece_count = layout.piece_count();
        let files = layout
            .files()
            .iter()
            .map(|file| FileSelector {
                priority: file.priority,
                pieces: BitField::from_indices(piece_count, file.start_piece()..=file.end_piece()),
            })
            .collect();

        // The file table only switches once the wrapped picker accepted the
        // new state.
        self.inner.initialise(own_pieces, layout, requests)?;
        self.files = files;
        Ok(())
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
        if self.files.is_empty() {
            return self
                .inner
                .pick_piece(peer, available, other_peers, count, start, end);
        }

        let groups = self.priority_groups(available.len());
        match groups.as_slice() {
            [(Priority::DoNotDownload, _), ..] => return PickResult::NoneAvailable,
            [_] => {
                return self
                    .inner
                    .pick_piece(peer, available, other_peers, count, start, end);
            }
            _ => {}
        }

        for (priority, mut candidates) in groups {
            if priority == Priority::DoNotDownload {
                break;
            }
            candidates.intersect_with(available);
            if candidates.all_false() {
                continue;
            }
            let result = self
                .inner
                .pick_piece(peer, &candidates, other_peers, count, start, end);
            if result.is_requests() {
                tracing::trace!(?priority, "picked from priority group");
                return result;
            }
        }
        PickResult::NoneAvailable
    }

    fn is_interesting(&self, bitfield: &BitField) -> bool {
        if self.files.is_empty() {
            return self.inner.is_interesting(bitfield);
        }
        let mut wanted = self.wanted_pieces(bitfield.len());
        wanted.intersect_with(bitfield);
        self.inner.is_interesting(&wanted)
    }

    fn set_file_priority(&mut self, file_index: usize, priority: Priority) {
        match self.files.get_mut(file_index) {
            Some(file) => file.priority = priority,
            None => tracing::warn!(file_index, "priority change for unknown file ignored"),
        }
        self.inner.set_file_priority(file_index, priority);
    }
}
