//! Raft log types persisted by the WAL and snapshotter.

/// Kind of a raft log entry.
///
/// The storage layer never interprets entry contents; the type only
/// round-trips so the consensus core can tell entries apart on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EntryType {
    /// Ordinary state-machine command.
    #[default]
    Normal = 0,
    /// Cluster membership change.
    ConfChange = 1,
}

impl EntryType {
    /// Converts a byte to an entry type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::ConfChange),
            _ => None,
        }
    }

    /// Converts the entry type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single raft log entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Term in which the entry was proposed.
    pub term: u64,
    /// Position in the raft log.
    pub index: u64,
    /// Entry kind.
    pub entry_type: EntryType,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl Entry {
    /// Creates a normal entry.
    pub fn new(term: u64, index: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            index,
            entry_type: EntryType::Normal,
            data: data.into(),
        }
    }
}

/// Durable raft vote and commit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardState {
    /// Current term.
    pub term: u64,
    /// Candidate voted for in the current term.
    pub vote: u64,
    /// Highest committed index.
    pub commit: u64,
}

impl HardState {
    /// Returns `true` if no field has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0 && self.commit == 0
    }
}

/// Snapshot marker stored inside the WAL.
///
/// Opening a WAL at a marker replays only entries after `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalSnapshot {
    /// Last index covered by the snapshot.
    pub index: u64,
    /// Term of that index.
    pub term: u64,
}

impl WalSnapshot {
    /// Creates a marker.
    #[must_use]
    pub const fn new(index: u64, term: u64) -> Self {
        Self { index, term }
    }
}

/// Cluster membership captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfState {
    /// Voting members.
    pub voters: Vec<u64>,
    /// Non-voting members.
    pub learners: Vec<u64>,
}

/// Snapshot metadata. Always stored in the clear.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Last index covered by the snapshot.
    pub index: u64,
    /// Term of that index.
    pub term: u64,
    /// Membership at that index.
    pub conf_state: ConfState,
}

/// A state-machine snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Position and membership.
    pub metadata: SnapshotMetadata,
    /// Serialized state machine.
    pub data: Vec<u8>,
}

impl Snapshot {
    /// Returns `true` for the zero snapshot, which is never persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }

    /// Returns the WAL marker for this snapshot.
    #[must_use]
    pub fn wal_marker(&self) -> WalSnapshot {
        WalSnapshot::new(self.metadata.index, self.metadata.term)
    }
}

/// Everything recovered from a full WAL read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalData {
    /// Metadata the WAL was created with.
    pub metadata: Vec<u8>,
    /// Last persisted hard state.
    pub hard_state: HardState,
    /// Entries after the snapshot the WAL was opened at.
    pub entries: Vec<Entry>,
}
