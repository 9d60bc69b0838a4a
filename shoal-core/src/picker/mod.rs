//! Piece selection strategies.
//!
//! Every strategy implements [`PiecePicker`]. [`StandardPicker`] owns the only
//! mutable request state; the other strategies wrap exactly one inner picker
//! and reorder or filter what it is offered. Any operation a layer does not
//! override is forwarded unchanged to its inner picker through
//! [`PiecePicker::inner_mut`], so layers compose without the base strategy
//! knowing about them.

mod active_requests;
pub mod priority;
pub mod randomised;
pub mod rarest_first;
pub mod snapshot;
pub mod standard;
pub mod streaming;

use std::sync::Arc;

pub use priority::PriorityPicker;
pub use randomised::RandomisedPicker;
pub use rarest_first::RarestFirstPicker;
pub use snapshot::RequestSnapshot;
pub use standard::StandardPicker;
pub use streaming::StreamingPicker;

use crate::config::PickerConfig;
use crate::observer::PickerObserver;
use crate::torrent::{
    BitField, PeerId, PeerView, Piece, PieceIndex, PieceRequest, Priority, TorrentLayout,
};

/// Outcome of a selection call.
///
/// Callers must treat all three cases distinctly: only `Requests` carries work,
/// `Deferred` means try again later, `NoneAvailable` means the peer currently
/// has nothing we can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum PickResult {
    /// Non-empty, ordered requests to send immediately
    Requests(Vec<PieceRequest>),
    /// Nothing to request right now, but not exhausted
    Deferred,
    /// No piece available from this peer in the requested range
    NoneAvailable,
}

impl PickResult {
    /// Wraps a single request.
    pub fn single(request: PieceRequest) -> Self {
        Self::Requests(vec![request])
    }

    /// Whether this result carries requests.
    pub fn is_requests(&self) -> bool {
        matches!(self, Self::Requests(_))
    }

    /// Returns the requests, empty unless this is `Requests`.
    pub fn into_requests(self) -> Vec<PieceRequest> {
        match self {
            Self::Requests(requests) => requests,
            Self::Deferred | Self::NoneAvailable => Vec::new(),
        }
    }

    /// Keeps `Requests`, otherwise runs the next attempt.
    pub fn or_else(self, next: impl FnOnce() -> PickResult) -> PickResult {
        match self {
            Self::Requests(_) => self,
            Self::Deferred | Self::NoneAvailable => next(),
        }
    }
}

impl From<Option<Vec<PieceRequest>>> for PickResult {
    fn from(requests: Option<Vec<PieceRequest>>) -> Self {
        match requests {
            Some(requests) if !requests.is_empty() => Self::Requests(requests),
            _ => Self::NoneAvailable,
        }
    }
}

/// Successful block validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    /// The piece, once every one of its blocks has been received. It is no
    /// longer part of the active request set.
    pub completed: Option<Piece>,
}

/// Why an incoming block was rejected.
///
/// Peer data is untrusted, so every variant is an ordinary outcome and no
/// picker state changes when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No active request for piece {piece_index}")]
    NoPiece { piece_index: PieceIndex },

    #[error("No block at piece {piece_index} offset {offset} length {length} for this peer")]
    NoBlock {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },

    #[error("Block at piece {piece_index} offset {offset} already received")]
    AlreadyReceived { piece_index: PieceIndex, offset: u32 },

    #[error("Block at piece {piece_index} offset {offset} was never requested")]
    NotRequested { piece_index: PieceIndex, offset: u32 },
}

/// Errors returned by picker configuration and integration paths.
#[derive(Debug, thiserror::Error)]
pub enum PickerError {
    /// The picker stack does not implement this operation. Signals a missing
    /// integration and must not be ignored by the caller.
    #[error("Operation `{operation}` is not supported by this picker stack")]
    Unsupported { operation: &'static str },

    #[error("Invalid torrent layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Invalid bitfield: {reason}")]
    InvalidBitfield { reason: String },

    #[error("Invalid request snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("Snapshot serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Interface shared by every piece selection strategy.
///
/// Range bounds passed to selection calls are inclusive piece indices.
/// Layers only override what they intercept; every default method forwards to
/// [`PiecePicker::inner_mut`]. The innermost picker has no inner picker and
/// must override every operation.
pub trait PiecePicker: Send {
    /// The wrapped picker, if this is a decorating layer.
    fn inner(&self) -> Option<&dyn PiecePicker> {
        None
    }

    fn inner_mut(&mut self) -> Option<&mut dyn PiecePicker> {
        None
    }

    /// Replaces all picker state from a known-good snapshot.
    ///
    /// `own_pieces` are the pieces already downloaded and verified, and
    /// `requests` the in-flight pieces to resume. Calling this twice with the
    /// same arguments yields the same state.
    ///
    /// # Errors
    /// - `PickerError::InvalidSnapshot` - A resumed piece does not fit `layout`
    fn initialise(
        &mut self,
        own_pieces: &BitField,
        layout: &TorrentLayout,
        requests: Vec<Piece>,
    ) -> Result<(), PickerError> {
        match self.inner_mut() {
            Some(inner) => inner.initialise(own_pieces, layout, requests),
            None => missing_override("initialise"),
        }
    }

    /// Selects up to `count` blocks to request from `peer`.
    ///
    /// `available` holds the pieces worth requesting from this peer, and
    /// `other_peers` the rest of the swarm for availability counting.
    fn pick_piece(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        other_peers: &[&dyn PeerView],
        count: usize,
        start: u32,
        end: u32,
    ) -> PickResult {
        match self.inner_mut() {
            Some(inner) => inner.pick_piece(peer, available, other_peers, count, start, end),
            None => missing_override("pick_piece"),
        }
    }

    /// Requests the next block of a piece this peer already started.
    fn continue_existing_request(
        &mut self,
        peer: &dyn PeerView,
        start: u32,
        end: u32,
    ) -> Option<PieceRequest> {
        match self.inner_mut() {
            Some(inner) => inner.continue_existing_request(peer, start, end),
            None => missing_override("continue_existing_request"),
        }
    }

    /// Requests the next block of any in-flight piece, including pieces
    /// started or abandoned by other peers. Refused for peers with repeated
    /// hash failures.
    fn continue_any_existing(
        &mut self,
        peer: &dyn PeerView,
        start: u32,
        end: u32,
    ) -> Option<PieceRequest> {
        match self.inner_mut() {
            Some(inner) => inner.continue_any_existing(peer, start, end),
            None => missing_override("continue_any_existing"),
        }
    }

    /// Releases one outstanding block owned by `peer`.
    fn cancel_request(&mut self, peer: PeerId, piece_index: PieceIndex, offset: u32, length: u32) {
        match self.inner_mut() {
            Some(inner) => inner.cancel_request(peer, piece_index, offset, length),
            None => missing_override("cancel_request"),
        }
    }

    /// Releases every outstanding block owned by `peer`.
    fn cancel_requests(&mut self, peer: PeerId) {
        match self.inner_mut() {
            Some(inner) => inner.cancel_requests(peer),
            None => missing_override("cancel_requests"),
        }
    }

    /// Releases every block owned by `peer` within an index range.
    ///
    /// # Errors
    /// - `PickerError::Unsupported` - The stack has no ranged cancellation
    fn cancel_requests_in_range(
        &mut self,
        peer: PeerId,
        start: u32,
        end: u32,
    ) -> Result<usize, PickerError> {
        match self.inner_mut() {
            Some(inner) => inner.cancel_requests_in_range(peer, start, end),
            None => Err(PickerError::Unsupported {
                operation: "cancel_requests_in_range",
            }),
        }
    }

    /// Marks a block received if it matches an outstanding request of `peer`.
    ///
    /// # Errors
    /// - `ValidationError` - The block does not match a request this peer holds
    fn validate_piece(
        &mut self,
        peer: &mut dyn PeerView,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Validated, ValidationError> {
        match self.inner_mut() {
            Some(inner) => inner.validate_piece(peer, piece_index, offset, length),
            None => missing_override("validate_piece"),
        }
    }

    /// Whether `bitfield` offers anything left to request.
    fn is_interesting(&self, bitfield: &BitField) -> bool {
        match self.inner() {
            Some(inner) => inner.is_interesting(bitfield),
            None => missing_override("is_interesting"),
        }
    }

    /// Blocks requested and not yet received.
    fn current_request_count(&self) -> usize {
        match self.inner() {
            Some(inner) => inner.current_request_count(),
            None => missing_override("current_request_count"),
        }
    }

    /// Blocks received for pieces still in flight.
    fn current_received_count(&self) -> usize {
        match self.inner() {
            Some(inner) => inner.current_received_count(),
            None => missing_override("current_received_count"),
        }
    }

    /// Copy of the active request set, ascending by piece index.
    fn export_active_requests(&self) -> Vec<Piece> {
        match self.inner() {
            Some(inner) => inner.export_active_requests(),
            None => missing_override("export_active_requests"),
        }
    }

    /// Drops every in-flight request.
    fn reset(&mut self) {
        match self.inner_mut() {
            Some(inner) => inner.reset(),
            None => missing_override("reset"),
        }
    }

    /// Cancels everything `peer` holds after the peer withdrew, returning the
    /// number of blocks released.
    fn abort_requests(&mut self, peer: PeerId) -> usize {
        match self.inner_mut() {
            Some(inner) => inner.abort_requests(peer),
            None => missing_override("abort_requests"),
        }
    }

    /// Handles a peer rejecting one of our requests.
    fn request_rejected(&mut self, peer: PeerId, request: &PieceRequest) {
        match self.inner_mut() {
            Some(inner) => inner.request_rejected(peer, request),
            None => missing_override("request_rejected"),
        }
    }

    /// Changes the download priority of one file.
    fn set_file_priority(&mut self, file_index: usize, priority: Priority) {
        match self.inner_mut() {
            Some(inner) => inner.set_file_priority(file_index, priority),
            None => missing_override("set_file_priority"),
        }
    }
}

fn missing_override(operation: &str) -> ! {
    unreachable!("innermost picker must implement `{operation}`")
}

impl<P: PiecePicker> PiecePicker for &mut P {
    fn inner(&self) -> Option<&dyn PiecePicker> {
        Some(&**self)
    }

    fn inner_mut(&mut self) -> Option<&mut dyn PiecePicker> {
        Some(&mut **self)
    }
}

impl PiecePicker for Box<dyn PiecePicker> {
    fn inner(&self) -> Option<&dyn PiecePicker> {
        Some(&**self)
    }

    fn inner_mut(&mut self) -> Option<&mut dyn PiecePicker> {
        Some(&mut **self)
    }
}

/// Default stack for regular downloads: rarest pieces first, random start
/// point among equally rare pieces, file priorities honoured.
pub type StandardStack = RarestFirstPicker<RandomisedPicker<PriorityPicker<StandardPicker>>>;

/// Builds the default download stack.
pub fn build_standard_stack(
    config: &PickerConfig,
    observer: Arc<dyn PickerObserver>,
) -> StandardStack {
    let base = StandardPicker::new(config.standard.clone(), observer);
    RarestFirstPicker::new(RandomisedPicker::new(
        PriorityPicker::new(base),
        &config.randomised,
    ))
}

/// Builds the stack for streaming playback.
pub fn build_streaming_stack(
    config: &PickerConfig,
    observer: Arc<dyn PickerObserver>,
) -> StreamingPicker<StandardPicker> {
    let base = StandardPicker::new(config.standard.clone(), observer.clone());
    StreamingPicker::new(base, config, observer)
}
