//! Playback-ordered picking for streaming.
//!
//! Pieces just ahead of the playback position form the high-priority window
//! and are requested strictly in order through the priority stack. Once that
//! window has nothing left for a peer, the following low-priority window (and
//! after it everything up to the end of the requested range) is handed to a
//! rarest-first, randomised stack so the rest of the torrent keeps spreading
//! through the swarm.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{
    PickResult, PickerError, PiecePicker, PriorityPicker, RandomisedPicker, RarestFirstPicker,
};
use crate::config::PickerConfig;
use crate::observer::{PickerEvent, PickerObserver, WindowPriority};
use crate::torrent::{BitField, FileLayout, PeerView, Piece, TorrentLayout};

/// Streaming strategy keeping a window of pieces ahead of the reader.
///
/// Both the high- and low-priority stacks decorate the same base picker, so
/// request state is never split between them.
pub struct StreamingPicker<P> {
    inner: PriorityPicker<P>,
    rng: ChaCha8Rng,
    high_priority_count: u32,
    low_priority_count: u32,
    high_priority_index: u32,
    piece_length: Option<u32>,
    observer: Arc<dyn PickerObserver>,
}

impl<P: PiecePicker> StreamingPicker<P> {
    /// Creates streaming picker over `base`.
    pub fn new(base: P, config: &PickerConfig, observer: Arc<dyn PickerObserver>) -> Self {
        let seed = config.randomised.seed.unwrap_or_else(rand::random);
        Self {
            inner: PriorityPicker::new(base),
            rng: ChaCha8Rng::seed_from_u64(seed),
            high_priority_count: config.streaming.high_priority_count,
            low_priority_count: config.streaming.low_priority_count(),
            high_priority_index: 0,
            piece_length: None,
            observer,
        }
    }

    /// Piece currently being consumed by playback.
    pub fn high_priority_index(&self) -> u32 {
        self.high_priority_index
    }

    pub fn get_ref(&self) -> &P {
        self.inner.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut P {
        self.inner.get_mut()
    }

    /// Advances the playback position to `position` bytes into `file`.
    ///
    /// Sequential reads never invalidate requests already in flight, so no
    /// cancellation signal is returned.
    pub fn read_to_position(&mut self, file: &FileLayout, position: u64) {
        self.move_high_priority(file, position);
    }

    /// Jumps the playback position to `position` bytes into `file`.
    ///
    /// Returns true when the high-priority piece changed; the caller should
    /// then cancel in-flight requests that fall outside the new window.
    pub fn seek_to_position(&mut self, file: &FileLayout, position: u64) -> bool {
        self.move_high_priority(file, position)
    }

    fn move_high_priority(&mut self, file: &FileLayout, position: u64) -> bool {
        let Some(piece_length) = self.piece_length else {
            tracing::warn!("playback position set before initialise");
            return false;
        };

        let offset = u64::from(file.start_offset_in_piece()) + position;
        let index = u64::from(file.start_piece()) + offset / u64::from(piece_length);
        let index = index.min(u64::from(file.end_piece())) as u32;

        let previous = self.high_priority_index;
        if index == previous {
            return false;
        }
        self.high_priority_index = index;
        self.observer.on_event(&PickerEvent::HighPriorityMoved {
            from: previous,
            to: index,
        });
        true
    }

    fn record_attempt(&self, priority: WindowPriority, start: u32, end: u32) {
        self.observer.on_event(&PickerEvent::WindowAttempted {
            priority,
            start,
            end,
        });
    }

    fn pick_high(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        other_peers: &[&dyn PeerView],
        count: usize,
        end: u32,
    ) -> PickResult {
        let start = self.high_priority_index;
        self.record_attempt(WindowPriority::High, start, end);

        if let Some(request) = self.inner.continue_any_existing(&*peer, start, end) {
            return PickResult::single(request);
        }
        self.inner
            .pick_piece(peer, available, other_peers, count, start, end)
    }

    fn pick_low(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        other_peers: &[&dyn PeerView],
        count: usize,
        start: u32,
        end: u32,
    ) -> PickResult {
        self.record_attempt(WindowPriority::Low, start, end);
        let mut low_stack =
            RarestFirstPicker::new(RandomisedPicker::with_rng(&mut self.inner, &mut self.rng));
        low_stack.pick_piece(peer, available, other_peers, count, start, end)
    }
}

impl<P: PiecePicker> PiecePicker for StreamingPicker<P> {
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
        self.inner.initialise(own_pieces, layout, requests)?;
        self.piece_length = Some(layout.piece_length());
        self.high_priority_index = 0;
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
        if count == 0 {
            return PickResult::Deferred;
        }

        let playback = self.high_priority_index;
        if self.high_priority_count > 0 && (start..=end).contains(&playback) {
            let high_end = end.min(playback.saturating_add(self.high_priority_count - 1));
            let result = self.pick_high(peer, available, other_peers, count, high_end);
            if result.is_requests() {
                return result;
            }
        }

        if end < playback {
            return PickResult::NoneAvailable;
        }

        let low_start = playback.max(start);
        let low_end = end.min(playback.saturating_add(self.low_priority_count));
        let result = self.pick_low(peer, available, other_peers, count, low_start, low_end);
        if result.is_requests() || low_end >= end {
            return result;
        }
        self.pick_low(peer, available, other_peers, count, low_start, end)
    }
}
