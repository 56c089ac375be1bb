// Separate test binary: these tests change the process-wide default.
use refcnt_audit::{default_flags, ftag, set_default_flags, DebugFlags, RefCount};

#[test]
fn counters_snapshot_default_at_creation() {
    assert_eq!(default_flags(), DebugFlags::ALL);
    let before = RefCount::new();
    assert_eq!(before.flags(), DebugFlags::ALL);

    let prev = set_default_flags(DebugFlags::empty());
    assert_eq!(prev, DebugFlags::ALL);
    let after = RefCount::new();
    assert!(after.flags().is_empty());

    // The older counter keeps auditing.
    let t = before.hold(ftag!()).unwrap();
    assert!(t.id().is_tracked());
    let _ = before.release(t);

    let t = after.hold(ftag!()).unwrap();
    assert!(!t.id().is_tracked());
    let _ = after.release(t);

    set_default_flags(prev);
}
