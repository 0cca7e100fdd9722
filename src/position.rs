/// Ordering keys for cards.
///
/// Keys are short strings over `a`..`z` whose plain byte-wise comparison is
/// the board's sort order. New keys are always derived from the keys of the
/// two neighbors at the insertion point, so inserting a card never requires
/// rewriting any other card's file, which is what keeps version-control
/// history free of renumbering churn.
///
/// Pure functions, no I/O.

const MIN_CHAR: u8 = b'a';
const MAX_CHAR: u8 = b'z';
/// Appended when the two inputs are lexicographically adjacent.
const MID_CHAR: u8 = b'm';
/// Synthetic out-of-range bounds used by `after`/`before`.
const LOW_BOUND: u8 = MIN_CHAR - 1;
const HIGH_BOUND: u8 = MAX_CHAR + 1;

/// Key for the first card in an empty column: the middle of the range,
/// leaving headroom on both sides.
pub fn first() -> String {
    "n".to_string()
}

/// A key sorting after `key`, with room left above it.
pub fn after(key: &str) -> String {
    midpoint(key.as_bytes(), &[HIGH_BOUND])
}

/// A key sorting before `key`, with room left below it.
pub fn before(key: &str) -> String {
    midpoint(&[LOW_BOUND], key.as_bytes())
}

/// A key strictly between `low` and `high` (which must satisfy `low < high`
/// byte-wise). Always succeeds: adjacent inputs grow the result by one
/// character instead of failing, so the keyspace never runs out.
pub fn between(low: &str, high: &str) -> String {
    debug_assert!(low < high, "between() requires low < high");
    midpoint(low.as_bytes(), high.as_bytes())
}

/// Walk positions left to right, padding an exhausted low side with the
/// alphabet minimum and an exhausted high side with the maximum. The first
/// position whose midpoint strictly exceeds the low-side character ends the
/// walk; if the inputs are adjacent at every position, extend with the
/// alphabet midpoint instead.
fn midpoint(low: &[u8], high: &[u8]) -> String {
    let len = low.len().max(high.len());
    let mut out = Vec::with_capacity(len + 1);
    let mut diverged = false;
    for i in 0..len {
        let lo = low.get(i).copied().unwrap_or(MIN_CHAR);
        let hi = high.get(i).copied().unwrap_or(MAX_CHAR);
        let mid = (lo + hi) / 2;
        if mid > lo {
            out.push(mid);
            diverged = true;
            break;
        }
        out.push(lo);
    }
    if !diverged {
        out.push(MID_CHAR);
    }
    out.into_iter().map(char::from).collect()
}
