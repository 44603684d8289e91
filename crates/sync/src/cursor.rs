//! Window planning and cursor advance rules.
//!
//! A stream cursor is the last block whose events are all applied. These
//! helpers decide which blocks to fetch next and how far a processed window
//! lets the cursor move.

/// An inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// The `window` blocks following `cursor`.
    pub fn after(cursor: u64, window: u64) -> Self {
        let from = cursor.saturating_add(1);
        Self {
            from,
            to: from.saturating_add(window.max(1) - 1),
        }
    }

    /// Cap the range at `head`. `None` when `head` has not reached `from`.
    pub fn clamp(self, head: u64) -> Option<Self> {
        (head >= self.from).then(|| Self {
            from: self.from,
            to: self.to.min(head),
        })
    }
}

/// Shape of one returned page, as far as cursor planning cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub returned: usize,
    pub first_block: Option<u64>,
    pub last_block: Option<u64>,
}

impl PageStats {
    pub fn of(blocks: impl IntoIterator<Item = u64>) -> Self {
        let mut stats = Self::default();
        for block in blocks {
            stats.returned += 1;
            stats.first_block.get_or_insert(block);
            stats.last_block = Some(block);
        }
        stats
    }
}

/// Where the cursor may move after a page fetched for `range`.
///
/// A page below `limit` drained the range, so the cursor moves to its end. A
/// full page may have cut a block short: the cursor stops before the first
/// returned block, or before the last one when that alone would not move it.
/// `None` means the cursor stays put.
pub fn advance_target(cursor: u64, range: BlockRange, page: PageStats, limit: usize) -> Option<u64> {
    if page.returned < limit {
        return (range.to > cursor).then_some(range.to);
    }

    let first = page.first_block.unwrap_or(range.from);
    let before_first = first.saturating_sub(1);
    if before_first > cursor {
        return Some(before_first);
    }

    let before_last = page.last_block.unwrap_or(first).saturating_sub(1);
    if before_last > cursor {
        return Some(before_last);
    }

    tracing::error!(
        cursor,
        block = first,
        limit,
        "Page limit reached within a single block; cursor cannot advance"
    );
    None
}

/// Hold the cursor below the earliest block that failed to apply.
pub fn with_failure_floor(target: Option<u64>, failed_block: Option<u64>) -> Option<u64> {
    match (target, failed_block) {
        (Some(t), Some(failed)) => Some(t.min(failed.saturating_sub(1))),
        (t, _) => t,
    }
}
