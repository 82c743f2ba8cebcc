//! Open-file table and handle id allocator.
//!
//! The host owns the authoritative mapping from handle id to underlying
//! file resource. Ids are small integers assigned lowest-free-first and
//! recycled only after an explicit close (or the session-level sweep), so
//! no two live handles ever share an id.

use std::path::PathBuf;

use tokio::fs::File;

use crate::protocol::{OpenMode, MAX_HANDLE_ID};

/// Default number of concurrently open streams per session.
pub const DEFAULT_MAX_OPEN_FILES: usize = 16;

/// One open stream: the file resource, its access mode, and the path it
/// was opened with. The file's own cursor is the authoritative offset.
#[derive(Debug)]
pub struct OpenFileEntry {
    /// Underlying host file.
    pub file: File,
    /// Access mode requested by the target.
    pub mode: OpenMode,
    /// Resolved host path (for diagnostics).
    pub path: PathBuf,
}

/// Fixed-capacity table of open streams, indexed by handle id.
#[derive(Debug)]
pub struct OpenFileTable {
    slots: Vec<Option<OpenFileEntry>>,
}

impl OpenFileTable {
    /// Create a table with the given capacity.
    ///
    /// Capacity is clamped so an assigned id can never collide with the
    /// invalid-handle sentinel.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HANDLE_ID as usize + 1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Assign the lowest free id to `entry`.
    ///
    /// Returns `None` when every slot is taken.
    pub fn allocate(&mut self, entry: OpenFileEntry) -> Option<u8> {
        let free = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[free] = Some(entry);
        Some(free as u8)
    }

    /// Look up a live entry.
    pub fn get_mut(&mut self, id: u8) -> Option<&mut OpenFileEntry> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    /// Release one id, returning its entry (the file closes on drop).
    ///
    /// Releasing a free or out-of-range id returns `None`; callers treat
    /// that as an idempotent no-op.
    pub fn release(&mut self, id: u8) -> Option<OpenFileEntry> {
        self.slots.get_mut(id as usize)?.take()
    }

    /// Release every entry. Returns how many were live.
    pub fn clear(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if slot.take().is_some() {
                released += 1;
            }
        }
        released
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Check if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
