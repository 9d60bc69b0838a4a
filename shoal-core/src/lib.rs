//! Shoal Core - Piece selection for peer-to-peer block exchange
//!
//! Decides which blocks of which pieces to request from each peer, keeps the
//! single ledger of in-flight requests, and validates incoming blocks against
//! it. Strategies compose as layers around [`picker::StandardPicker`], the only
//! owner of mutable request state.

pub mod config;
pub mod observer;
pub mod picker;
pub mod torrent;

// Re-export main types for convenient access
pub use config::PickerConfig;
pub use observer::{PickerEvent, PickerObserver, RecordingObserver, TracingObserver};
pub use picker::{
    PickResult, PickerError, PiecePicker, RequestSnapshot, StandardStack, Validated,
    ValidationError, build_standard_stack, build_streaming_stack,
};
pub use torrent::{BitField, PeerId, PeerState, PeerView, Piece, PieceIndex, PieceRequest};
