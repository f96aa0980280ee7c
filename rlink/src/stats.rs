use serde::Serialize;

/// Counters kept by a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub batches: u64,
    pub operations: u64,
    pub expectation_failures: u64,
    pub transport_errors: u64,
    pub malformed_replies: u64,
    /// Replies to earlier, abandoned exchanges which were thrown away.
    pub stale_replies: u64,
    /// Errors noted by users of the link (e.g. a CPU wait which timed out).
    pub errors: u64,
    pub attention_waits: u64,
    pub attention_timeouts: u64,
    pub attention_dispatches: u64,
}
