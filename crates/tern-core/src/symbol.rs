//! Process-wide symbol table.
//!
//! Symbol text and string text share one interner. Every distinct string is
//! assigned a dense index on first sight; indices are never recycled, so the
//! same text maps to the same [`Spur`] for the lifetime of the process.
//! Lookups from any number of threads proceed concurrently; inserts are
//! serialized inside the interner.

use std::sync::OnceLock;

use lasso::{Key, ThreadedRodeo};

pub use lasso::Spur;

static INTERNER: OnceLock<ThreadedRodeo> = OnceLock::new();

fn interner() -> &'static ThreadedRodeo {
    INTERNER.get_or_init(ThreadedRodeo::default)
}

/// Intern a string, returning its key. Get-or-insert is atomic.
pub fn intern(s: &str) -> Spur {
    interner().get_or_intern(s)
}

/// Resolve a key back to its text.
///
/// Panics if the key was not produced by [`intern`] in this process. Keys that
/// arrive from outside (decoded streams) go through [`try_resolve`] instead.
pub fn resolve(spur: Spur) -> &'static str {
    interner().resolve(&spur)
}

pub fn try_resolve(spur: Spur) -> Option<&'static str> {
    interner().try_resolve(&spur)
}

/// The 64-bit interned index carried in instruction payloads.
pub fn index_of(spur: Spur) -> u64 {
    spur.into_usize() as u64
}

/// Turn a payload index back into a key, if it names an interned string.
pub fn spur_from_index(index: u64) -> Option<Spur> {
    let idx = usize::try_from(index).ok()?;
    let spur = Spur::try_from_usize(idx)?;
    try_resolve(spur).map(|_| spur)
}

/// Number of distinct strings interned so far.
pub fn len() -> usize {
    interner().len()
}

/// Compare two keys by their text.
pub fn compare_spurs(a: Spur, b: Spur) -> std::cmp::Ordering {
    if a == b {
        return std::cmp::Ordering::Equal;
    }
    resolve(a).cmp(resolve(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = intern("lambda");
        let b = intern("lambda");
        assert_eq!(a, b);
        assert_eq!(resolve(a), "lambda");
    }

    #[test]
    fn test_distinct_strings_distinct_keys() {
        assert_ne!(intern("car"), intern("cdr"));
    }

    #[test]
    fn test_index_round_trip() {
        let spur = intern("round-trip-me");
        let idx = index_of(spur);
        assert_eq!(spur_from_index(idx), Some(spur));
    }

    #[test]
    fn test_unknown_index() {
        assert_eq!(spur_from_index(u64::MAX), None);
        assert_eq!(spur_from_index(u32::MAX as u64 + 10), None);
    }

    #[test]
    fn test_indices_grow_monotonically() {
        let first = index_of(intern("monotonic-first-9f2c"));
        let second = index_of(intern("monotonic-second-9f2c"));
        assert!(second > first);
    }

    #[test]
    fn test_concurrent_interning_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..100)
                        .map(|i| intern(&format!("shared-{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<Spur>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
    }

    #[test]
    fn test_compare_spurs() {
        use std::cmp::Ordering;
        assert_eq!(compare_spurs(intern("a"), intern("b")), Ordering::Less);
        assert_eq!(compare_spurs(intern("b"), intern("b")), Ordering::Equal);
    }
}
