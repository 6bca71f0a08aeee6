//! Integration tests for concurrent transactions.

use kestreldb::common::config::DEFAULT_MEMORY;
use kestreldb::concurrency::AbortCause;
use kestreldb::{DataManager, Error, IsolationLevel, MemoryLedger, Uid, VersionManager};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn create_vm() -> (Arc<VersionManager>, TempDir) {
    let dir = tempdir().unwrap();
    let dm = Arc::new(DataManager::create(dir.path().join("db"), DEFAULT_MEMORY).unwrap());
    let vm = VersionManager::new(Arc::new(MemoryLedger::new()), dm);
    (Arc::new(vm), dir)
}

fn seed(vm: &VersionManager, rows: &[&[u8]]) -> Vec<Uid> {
    let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let uids = rows.iter().map(|row| vm.insert(xid, row).unwrap()).collect();
    vm.commit(xid).unwrap();
    uids
}

fn wait_until_blocked(vm: &VersionManager, xid: kestreldb::Xid) {
    for _ in 0..500 {
        if vm.is_waiting(xid) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("transaction {xid:?} never blocked");
}

/// Two transactions lock rows in opposite order; one of them must give up.
#[test]
fn test_deadlock_aborts_one_side() {
    let (vm, _dir) = create_vm();
    let uids = seed(&vm, &[b"a", b"b"]);
    let (a, b) = (uids[0], uids[1]);

    let t1 = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let t2 = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vm.delete(t1, a).unwrap());
    assert!(vm.delete(t2, b).unwrap());

    let blocked = {
        let vm = Arc::clone(&vm);
        thread::spawn(move || vm.delete(t1, b))
    };
    wait_until_blocked(&vm, t1);

    // t2 closes the cycle and is aborted; t1 is handed the lock.
    assert!(matches!(vm.delete(t2, a), Err(Error::ConcurrentUpdate)));
    assert_eq!(vm.transaction(t2).unwrap().last_error(), Some(AbortCause::Deadlock));
    assert!(blocked.join().unwrap().unwrap());

    // The poisoned transaction keeps failing until aborted.
    assert!(matches!(vm.commit(t2), Err(Error::ConcurrentUpdate)));
    vm.abort(t2).unwrap();
    vm.commit(t1).unwrap();

    let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(vm.read(reader, a).unwrap(), None);
    assert_eq!(vm.read(reader, b).unwrap(), None);
    vm.commit(reader).unwrap();
}

/// A waiter picks up the lock once the holder aborts and then deletes.
#[test]
fn test_waiter_proceeds_after_holder_aborts() {
    let (vm, _dir) = create_vm();
    let row = seed(&vm, &[b"row"])[0];

    let holder = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let waiter = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vm.delete(holder, row).unwrap());

    let handle = {
        let vm = Arc::clone(&vm);
        thread::spawn(move || vm.delete(waiter, row))
    };
    wait_until_blocked(&vm, waiter);

    vm.abort(holder).unwrap();
    assert!(handle.join().unwrap().unwrap());
    vm.commit(waiter).unwrap();

    let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(vm.read(reader, row).unwrap(), None);
    vm.commit(reader).unwrap();
}

/// Read committed sees other transactions' commits as they happen.
#[test]
fn test_read_committed_sees_new_commits() {
    let (vm, _dir) = create_vm();

    let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let writer = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let uid = vm.insert(writer, b"fresh").unwrap();

    assert_eq!(vm.read(reader, uid).unwrap(), None);
    vm.commit(writer).unwrap();
    assert_eq!(vm.read(reader, uid).unwrap(), Some(b"fresh".to_vec()));
    vm.commit(reader).unwrap();
}

/// Repeatable read keeps seeing the world as of `begin`.
#[test]
fn test_repeatable_read_is_stable() {
    let (vm, _dir) = create_vm();
    let old = seed(&vm, &[b"old"])[0];

    let reader = vm.begin(IsolationLevel::RepeatableRead).unwrap();

    let writer = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    let new = vm.insert(writer, b"new").unwrap();
    assert!(vm.delete(writer, old).unwrap());
    vm.commit(writer).unwrap();

    assert_eq!(vm.read(reader, old).unwrap(), Some(b"old".to_vec()));
    assert_eq!(vm.read(reader, new).unwrap(), None);
    vm.commit(reader).unwrap();

    let late = vm.begin(IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(vm.read(late, old).unwrap(), None);
    assert_eq!(vm.read(late, new).unwrap(), Some(b"new".to_vec()));
    vm.commit(late).unwrap();
}

/// Deleting a row that a later transaction already deleted is a version
/// skip under repeatable read.
#[test]
fn test_repeatable_read_version_skip() {
    let (vm, _dir) = create_vm();
    let row = seed(&vm, &[b"row"])[0];

    let reader = vm.begin(IsolationLevel::RepeatableRead).unwrap();
    let writer = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    assert!(vm.delete(writer, row).unwrap());
    vm.commit(writer).unwrap();

    assert!(matches!(vm.delete(reader, row), Err(Error::ConcurrentUpdate)));
    let txn = vm.transaction(reader).unwrap();
    assert_eq!(txn.last_error(), Some(AbortCause::VersionSkip));
    assert!(txn.is_auto_aborted());
    vm.abort(reader).unwrap();
}

/// Many threads insert and read back their own rows concurrently.
#[test]
fn test_concurrent_inserts() {
    let (vm, _dir) = create_vm();

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
                let rows: Vec<_> = (0..50u8)
                    .map(|j| {
                        let data = vec![i, j, i ^ j];
                        (vm.insert(xid, &data).unwrap(), data)
                    })
                    .collect();
                vm.commit(xid).unwrap();
                rows
            })
        })
        .collect();

    let rows: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
    for (uid, data) in rows {
        assert_eq!(vm.read(reader, uid).unwrap(), Some(data));
    }
    vm.commit(reader).unwrap();
}
