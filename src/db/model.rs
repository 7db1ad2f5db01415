//! Read models returned by the status queries.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

/// Stored entry count for one content kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindCount {
    pub kind: String,
    pub entries: i64,
}

/// Last completed run of a sync routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub name: String,
    pub finished_at: String,
    pub summary: String,
}

/// Advisory lock row; `expires_at` is unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub name: String,
    pub holder: String,
    pub expires_at: i64,
}

/// Snapshot printed by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    pub kinds: Vec<KindCount>,
    pub pending_media: i64,
    pub cached_responses: i64,
    pub runs: Vec<RunRecord>,
    pub locks: Vec<LockRecord>,
}
