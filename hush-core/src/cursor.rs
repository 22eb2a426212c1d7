//! Per-channel message index tracking.
//!
//! The remote assigns each channel a monotonically increasing message
//! index. The local watermark only ever moves forward; a remote index
//! below it means the remote and local state disagree.

/// Result of offering a remote index to a [`MessageCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAdvance {
    /// The watermark moved forward.
    Moved {
        /// Previous watermark.
        from: i64,
        /// New watermark.
        to: i64,
    },
    /// The remote index equals the watermark.
    Unchanged,
    /// The remote index is behind the watermark; nothing was applied.
    Backward {
        /// Local watermark.
        local: i64,
        /// Remote index that was rejected.
        remote: i64,
    },
}

/// What a pull loop should do after applying a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStep {
    /// More data is available; pull again from the new watermark.
    Continue,
    /// The channel is up to date.
    Done,
    /// The remote claims more data but did not advance; stop to avoid spinning.
    Stalled,
    /// The remote index went backward; the batch index was not applied.
    Inconsistent {
        /// Local watermark.
        local: i64,
        /// Remote index that was rejected.
        remote: i64,
    },
}

/// Monotonic message index for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageCursor {
    index: i64,
}

impl MessageCursor {
    /// Create a cursor at the given persisted index.
    pub fn new(index: i64) -> Self {
        Self { index }
    }

    /// Current watermark.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Whether the remote has messages this cursor has not seen.
    pub fn is_behind(&self, remote: i64) -> bool {
        remote > self.index
    }

    /// Offer a remote index. Only forward movement is applied.
    pub fn advance(&mut self, remote: i64) -> IndexAdvance {
        if remote > self.index {
            let from = self.index;
            self.index = remote;
            IndexAdvance::Moved { from, to: remote }
        } else if remote == self.index {
            IndexAdvance::Unchanged
        } else {
            IndexAdvance::Backward {
                local: self.index,
                remote,
            }
        }
    }

    /// Apply a pulled batch's index and decide whether to keep pulling.
    pub fn apply_batch(&mut self, remote: i64, truncated: bool) -> PullStep {
        match self.advance(remote) {
            IndexAdvance::Backward { local, remote } => PullStep::Inconsistent { local, remote },
            IndexAdvance::Unchanged if truncated => PullStep::Stalled,
            _ if truncated => PullStep::Continue,
            _ => PullStep::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(MessageCursor::default().index(), 0);
    }

    #[test]
    fn advance_moves_forward() {
        let mut cursor = MessageCursor::new(3);
        assert_eq!(cursor.advance(5), IndexAdvance::Moved { from: 3, to: 5 });
        assert_eq!(cursor.index(), 5);
    }

    #[test]
    fn advance_same_is_unchanged() {
        let mut cursor = MessageCursor::new(5);
        assert_eq!(cursor.advance(5), IndexAdvance::Unchanged);
    }

    #[test]
    fn advance_backward_is_rejected() {
        let mut cursor = MessageCursor::new(5);
        assert_eq!(
            cursor.advance(2),
            IndexAdvance::Backward { local: 5, remote: 2 }
        );
        assert_eq!(cursor.index(), 5);
    }

    #[test]
    fn is_behind() {
        let cursor = MessageCursor::new(4);
        assert!(cursor.is_behind(5));
        assert!(!cursor.is_behind(4));
        assert!(!cursor.is_behind(1));
    }

    // ===========================================
    // Pull loop decisions
    // ===========================================

    #[test]
    fn truncated_batch_continues() {
        let mut cursor = MessageCursor::new(0);
        assert_eq!(cursor.apply_batch(3, true), PullStep::Continue);
        assert_eq!(cursor.apply_batch(5, false), PullStep::Done);
        assert_eq!(cursor.index(), 5);
    }

    #[test]
    fn empty_final_batch_is_done() {
        let mut cursor = MessageCursor::new(5);
        assert_eq!(cursor.apply_batch(5, false), PullStep::Done);
    }

    #[test]
    fn truncated_without_progress_stalls() {
        let mut cursor = MessageCursor::new(5);
        assert_eq!(cursor.apply_batch(5, true), PullStep::Stalled);
    }

    #[test]
    fn backward_batch_is_inconsistent() {
        let mut cursor = MessageCursor::new(5);
        assert_eq!(
            cursor.apply_batch(4, true),
            PullStep::Inconsistent { local: 5, remote: 4 }
        );
        assert_eq!(cursor.index(), 5);
    }

    #[test]
    fn index_never_decreases() {
        let mut cursor = MessageCursor::new(0);
        let mut last = cursor.index();
        for remote in [1, 4, 2, 4, 9, 0, 10] {
            cursor.advance(remote);
            assert!(cursor.index() >= last);
            last = cursor.index();
        }
        assert_eq!(cursor.index(), 10);
    }
}
