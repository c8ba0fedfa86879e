//! Segment type, planning, and dynamic resegmentation.

/// A contiguous byte range `[start, end]` (inclusive) of the output file
/// assigned to one worker, with its own completion counter so partial
/// progress survives a persist/restart cycle without a separate bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Start offset, inclusive.
    pub start: u64,
    /// End offset, inclusive.
    pub end: u64,
    pub downloaded_bytes: u64,
}

impl Segment {
    /// Length of this segment in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_bytes >= self.len()
    }

    /// HTTP Range header value: `bytes=start-end`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Splits `[0, total_bytes)` into `N = min(connections, total_bytes)`
/// contiguous segments. Bytes are divided evenly with the remainder
/// distributed to the earliest segments. Plans a single segment covering
/// the whole file when `connections <= 1` or `supports_resume` is false.
pub fn plan(total_bytes: u64, connections: usize, supports_resume: bool) -> Vec<Segment> {
    if total_bytes == 0 {
        return Vec::new();
    }
    let connections = if supports_resume { connections.max(1) } else { 1 };
    let n = (connections as u64).min(total_bytes) as usize;
    let n = n.max(1);

    let n64 = n as u64;
    let base = total_bytes / n64;
    let remainder = total_bytes % n64;

    let mut out = Vec::with_capacity(n);
    let mut offset = 0u64;
    for i in 0..n {
        let len = base + if (i as u64) < remainder { 1 } else { 0 };
        let end = offset + len - 1;
        out.push(Segment {
            index: i,
            start: offset,
            end,
            downloaded_bytes: 0,
        });
        offset += len;
    }
    out
}

/// Plans as if the source supports resume; a thin convenience over `plan`.
pub fn plan_segments(total_bytes: u64, connections: usize) -> Vec<Segment> {
    plan(total_bytes, connections, true)
}

/// Recomputes a segment plan around already-downloaded bytes, per the
/// resegmentation contract:
/// 1. bytes already in a completed segment stay in an identical completed segment;
/// 2. the completed prefix of a partial segment is split off as its own completed segment;
/// 3. the remaining (unfinished) byte ranges are re-split into `new_connections`
///    contiguous incomplete segments using the same even-plus-remainder rule;
/// 4. the result is reindexed `0..N` in sorted order with no gaps or overlaps.
///
/// Pure function; never performs I/O.
pub fn resegment(current: &[Segment], new_connections: usize) -> Vec<Segment> {
    let mut completed: Vec<(u64, u64)> = Vec::new();
    let mut remaining_ranges: Vec<(u64, u64)> = Vec::new();

    for seg in current {
        if seg.is_complete() {
            completed.push((seg.start, seg.end));
        } else if seg.downloaded_bytes > 0 {
            let done_end = seg.start + seg.downloaded_bytes - 1;
            completed.push((seg.start, done_end));
            if done_end < seg.end {
                remaining_ranges.push((done_end + 1, seg.end));
            }
        } else {
            remaining_ranges.push((seg.start, seg.end));
        }
    }

    let remaining_total: u64 = remaining_ranges.iter().map(|&(s, e)| e - s + 1).sum();

    let mut new_incomplete = Vec::new();
    if remaining_total > 0 {
        let n = (new_connections.max(1) as u64).min(remaining_total) as usize;
        let n = n.max(1);
        let base = remaining_total / n as u64;
        let remainder = remaining_total % n as u64;

        // Walk the (possibly disjoint) remaining ranges as one flattened byte
        // stream and cut it into `n` even-plus-remainder pieces.
        let mut range_iter = remaining_ranges.iter();
        let mut cur = range_iter.next().copied();
        let mut cur_pos = cur.map(|(s, _)| s).unwrap_or(0);

        for i in 0..n {
            let mut need = base + if (i as u64) < remainder { 1 } else { 0 };
            let seg_start = cur_pos;
            let mut seg_end = cur_pos;
            while need > 0 {
                let (_, range_end) = cur.expect("remaining_total accounting error");
                let avail = range_end - cur_pos + 1;
                if avail > need {
                    seg_end = cur_pos + need - 1;
                    cur_pos += need;
                    need = 0;
                } else {
                    seg_end = range_end;
                    need -= avail;
                    cur = range_iter.next().copied();
                    cur_pos = cur.map(|(s, _)| s).unwrap_or(seg_end + 1);
                }
            }
            new_incomplete.push((seg_start, seg_end));
        }
    }

    let mut out: Vec<(u64, u64, u64)> = Vec::new();
    for (s, e) in completed {
        let len = e - s + 1;
        out.push((s, e, len));
    }
    for (s, e) in new_incomplete {
        out.push((s, e, 0));
    }
    out.sort_by_key(|&(s, _, _)| s);

    out.into_iter()
        .enumerate()
        .map(|(index, (start, end, downloaded_bytes))| Segment {
            index,
            start,
            end,
            downloaded_bytes,
        })
        .collect()
}
