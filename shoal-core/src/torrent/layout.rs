//! Piece and file geometry of a torrent's content

use std::path::{Path, PathBuf};

use super::block::BLOCK_SIZE;
use crate::picker::PickerError;

/// Download priority of a file.
///
/// `DoNotDownload` pieces are never offered to the underlying picker;
/// higher priorities are offered before lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Skip the file entirely
    DoNotDownload = 0,
    Lowest = 1,
    Low = 2,
    /// Default priority for new files
    #[default]
    Normal = 3,
    High = 4,
    Highest = 5,
    /// Needed right now, e.g. media headers required for playback
    Immediate = 6,
}

/// One file within the torrent's contiguous content.
#[derive(Debug, Clone, PartialEq)]
pub struct FileLayout {
    path: PathBuf,
    offset: u64,
    length: u64,
    start_piece: u32,
    end_piece: u32,
    start_offset_in_piece: u32,
    pub priority: Priority,
}

impl FileLayout {
    /// Relative path of the file inside the torrent.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the file's first byte within the whole torrent.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Index of the piece holding the file's first byte.
    pub fn start_piece(&self) -> u32 {
        self.start_piece
    }

    /// Index of the piece holding the file's last byte (inclusive).
    pub fn end_piece(&self) -> u32 {
        self.end_piece
    }

    /// Offset of the file's first byte within its start piece.
    pub fn start_offset_in_piece(&self) -> u32 {
        self.start_offset_in_piece
    }
}

/// Piece geometry shared by every picker layer.
///
/// Only the final piece may be shorter than `piece_length`; every other piece
/// splits into `piece_length / BLOCK_SIZE` blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentLayout {
    piece_length: u32,
    total_size: u64,
    files: Vec<FileLayout>,
}

impl TorrentLayout {
    /// Creates a layout for files laid out back to back in the given order.
    ///
    /// # Errors
    /// - `PickerError::InvalidLayout` - Zero piece length, piece length not a
    ///   multiple of the block size, or no content at all
    pub fn new(
        piece_length: u32,
        files: impl IntoIterator<Item = (PathBuf, u64)>,
    ) -> Result<Self, PickerError> {
        if piece_length == 0 || piece_length % BLOCK_SIZE != 0 {
            return Err(PickerError::InvalidLayout {
                reason: format!("piece length {piece_length} is not a multiple of {BLOCK_SIZE}"),
            });
        }

        let piece_length_u64 = u64::from(piece_length);
        let mut offset = 0u64;
        let mut laid_out = Vec::new();
        for (path, length) in files {
            let start_piece = (offset / piece_length_u64) as u32;
            let last_byte = (offset + length).saturating_sub(1).max(offset);
            laid_out.push(FileLayout {
                path,
                offset,
                length,
                start_piece,
                end_piece: (last_byte / piece_length_u64) as u32,
                start_offset_in_piece: (offset % piece_length_u64) as u32,
                priority: Priority::default(),
            });
            offset += length;
        }

        if offset == 0 {
            return Err(PickerError::InvalidLayout {
                reason: "torrent has no content".to_string(),
            });
        }

        // Empty files at the very end would otherwise start one past the last piece.
        let last_piece = (offset.div_ceil(piece_length_u64) - 1) as u32;
        for file in laid_out.iter_mut().filter(|file| file.start_piece > last_piece) {
            file.start_piece = last_piece;
            file.end_piece = last_piece;
            file.start_offset_in_piece =
                (file.offset - u64::from(last_piece) * piece_length_u64) as u32;
        }

        Ok(Self {
            piece_length,
            total_size: offset,
            files: laid_out,
        })
    }

    /// Creates a single-file layout.
    ///
    /// # Errors
    /// - `PickerError::InvalidLayout` - See [`TorrentLayout::new`]
    pub fn single_file(
        path: impl Into<PathBuf>,
        piece_length: u32,
        total_size: u64,
    ) -> Result<Self, PickerError> {
        Self::new(piece_length, [(path.into(), total_size)])
    }

    /// Fixed length of every piece except possibly the last.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Total content size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Files in content order.
    pub fn files(&self) -> &[FileLayout] {
        &self.files
    }

    /// Mutable access to a file, e.g. to change its priority.
    pub fn file_mut(&mut self, file_index: usize) -> Option<&mut FileLayout> {
        self.files.get_mut(file_index)
    }

    /// Number of pieces covering the content.
    pub fn piece_count(&self) -> u32 {
        self.total_size.div_ceil(u64::from(self.piece_length)) as u32
    }

    /// Length in bytes of the given piece; the final piece is truncated.
    pub fn piece_size(&self, index: u32) -> u32 {
        let start = u64::from(index) * u64::from(self.piece_length);
        let remaining = self.total_size.saturating_sub(start);
        remaining.min(u64::from(self.piece_length)) as u32
    }

    /// Number of blocks the given piece splits into.
    pub fn blocks_in_piece(&self, index: u32) -> u32 {
        self.piece_size(index).div_ceil(BLOCK_SIZE)
    }
}
