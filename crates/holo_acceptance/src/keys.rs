//! Metadata keyspace layout.
//!
//! Range descriptors live under the second-level meta prefix, one row per
//! range, keyed by the range's end key. Scanning the prefix in order surfaces
//! the bootstrap range among the first rows.

/// Prefix shared by every meta2 addressing record.
pub const META2_PREFIX: &[u8] = b"\x00\x00meta2";

/// Largest possible user key. Used as the end key of the last range.
pub const KEY_MAX: &[u8] = b"\xff\xff";

/// Build the meta2 key that addresses the range ending at `end_key`.
pub fn meta2_key(end_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(META2_PREFIX.len() + end_key.len());
    out.extend_from_slice(META2_PREFIX);
    out.extend_from_slice(end_key);
    out
}

/// Smallest key that sorts after every key starting with `prefix`.
///
/// Trailing `0xff` bytes are dropped before the last remaining byte is
/// incremented. A prefix made only of `0xff` bytes (or an empty prefix) has
/// no finite successor, so `KEY_MAX` is returned.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    KEY_MAX.to_vec()
}

/// Returns true when `key` falls in the half-open interval `[start, end)`.
pub fn in_span(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    key >= start && key < end
}
