//! Lock-wait graph with deadlock detection.
//!
//! Writers lock a record (by uid) before deleting it. The table tracks:
//!
//! ```text
//! held:        xid -> [uid]      records a transaction holds
//! holder:      uid -> xid        who holds a record
//! waiters:     uid -> [xid]      FIFO queue of transactions waiting for it
//! waiting_for: xid -> uid        the one record a transaction waits for
//! ```
//!
//! A transaction waits for at most one record at a time, so following
//! `xid -> waiting_for -> holder -> ...` is a simple chain walk. A request
//! that would close a cycle is refused with `Error::Deadlock`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::common::{Error, Result, Uid, Xid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Pending,
    Granted,
    Cancelled,
}

/// Handle a blocked transaction sleeps on until the record is handed to
/// it or its wait is cancelled.
#[derive(Debug)]
pub struct WaitToken {
    state: Mutex<WaitState>,
    changed: Condvar,
}

impl WaitToken {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::Pending),
            changed: Condvar::new(),
        }
    }

    /// Block until resolved. Returns `true` if the lock was granted,
    /// `false` if the wait was cancelled.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while *state == WaitState::Pending {
            self.changed.wait(&mut state);
        }
        *state == WaitState::Granted
    }

    fn is_pending(&self) -> bool {
        *self.state.lock() == WaitState::Pending
    }

    fn resolve(&self, outcome: WaitState) {
        let mut state = self.state.lock();
        if *state == WaitState::Pending {
            *state = outcome;
            self.changed.notify_all();
        }
    }
}

#[derive(Default)]
struct Graph {
    held: HashMap<Xid, Vec<Uid>>,
    holder: HashMap<Uid, Xid>,
    waiters: HashMap<Uid, VecDeque<Xid>>,
    waiting_for: HashMap<Xid, Uid>,
    tokens: HashMap<Xid, Arc<WaitToken>>,
}

impl Graph {
    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.holder.insert(uid, xid);
        self.held.entry(xid).or_default().push(uid);
    }

    fn stop_waiting(&mut self, xid: Xid) {
        let Some(uid) = self.waiting_for.remove(&xid) else {
            return;
        };
        if let Some(queue) = self.waiters.get_mut(&uid) {
            queue.retain(|&x| x != xid);
            if queue.is_empty() {
                self.waiters.remove(&uid);
            }
        }
    }

    /// Give `uid` to the first waiter still blocked on it.
    fn hand_over(&mut self, uid: Uid) {
        self.holder.remove(&uid);
        let Some(queue) = self.waiters.get_mut(&uid) else {
            return;
        };

        while let Some(next) = queue.pop_front() {
            let Some(token) = self.tokens.remove(&next) else {
                continue;
            };
            if !token.is_pending() {
                continue;
            }
            self.waiting_for.remove(&next);
            self.holder.insert(uid, next);
            self.held.entry(next).or_default().push(uid);
            token.resolve(WaitState::Granted);
            trace!(xid = next.0, uid = uid.0, "lock.handed_over");
            break;
        }

        if queue.is_empty() {
            self.waiters.remove(&uid);
        }
    }

    /// Walk the wait chain from every holder, stamping each visited
    /// transaction with the id of the walk that reached it first. Meeting
    /// the current walk's own stamp means a cycle; meeting an older stamp
    /// means that chain was already explored.
    fn has_deadlock(&self) -> bool {
        let mut stamps: HashMap<Xid, u32> = HashMap::new();
        let mut stamp = 0;
        for &root in self.held.keys() {
            if stamps.contains_key(&root) {
                continue;
            }
            stamp += 1;
            if self.walk(root, stamp, &mut stamps) {
                return true;
            }
        }
        false
    }

    fn walk(&self, mut xid: Xid, stamp: u32, stamps: &mut HashMap<Xid, u32>) -> bool {
        loop {
            if let Some(&seen) = stamps.get(&xid) {
                return seen == stamp;
            }
            stamps.insert(xid, stamp);

            let Some(uid) = self.waiting_for.get(&xid) else {
                return false;
            };
            let Some(&next) = self.holder.get(uid) else {
                return false;
            };
            xid = next;
        }
    }
}

/// The lock-wait graph.
///
/// # Thread Safety
/// One `Mutex` guards the whole graph; deadlock detection runs under it.
/// Blocking happens outside it, on the returned [`WaitToken`].
#[derive(Default)]
pub struct LockTable {
    graph: Mutex<Graph>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `uid` for `xid`.
    ///
    /// Returns `Ok(None)` if the lock is held now, or `Ok(Some(token))` if
    /// the caller must block on `token` first.
    ///
    /// # Errors
    /// Returns `Error::Deadlock` if waiting would close a cycle. The
    /// request leaves no trace in the graph in that case.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<WaitToken>>> {
        let mut graph = self.graph.lock();

        if graph.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }
        if !graph.holder.contains_key(&uid) {
            graph.grant(xid, uid);
            return Ok(None);
        }

        graph.waiting_for.insert(xid, uid);
        graph.waiters.entry(uid).or_default().push_back(xid);

        if graph.has_deadlock() {
            graph.stop_waiting(xid);
            debug!(xid = xid.0, uid = uid.0, "lock.deadlock");
            return Err(Error::Deadlock);
        }

        let token = Arc::new(WaitToken::new());
        graph.tokens.insert(xid, Arc::clone(&token));
        trace!(xid = xid.0, uid = uid.0, "lock.wait");
        Ok(Some(token))
    }

    /// Drop everything `xid` holds or waits for.
    ///
    /// Each held record passes to its next live waiter in FIFO order. If
    /// `xid` itself was blocked, its token is cancelled.
    pub fn remove(&self, xid: Xid) {
        let mut graph = self.graph.lock();

        if let Some(uids) = graph.held.remove(&xid) {
            for uid in uids {
                graph.hand_over(uid);
            }
        }

        graph.stop_waiting(xid);
        if let Some(token) = graph.tokens.remove(&xid) {
            token.resolve(WaitState::Cancelled);
        }
    }

    /// Current holder of `uid`.
    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.graph.lock().holder.get(&uid).copied()
    }

    /// `true` if `xid` is blocked on some record.
    pub fn is_waiting(&self, xid: Xid) -> bool {
        self.graph.lock().waiting_for.contains_key(&xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;
    use std::thread;
    use std::time::Duration;

    fn uid(n: u16) -> Uid {
        Uid::new(PageId::new(2), n)
    }

    #[test]
    fn test_free_lock_granted() {
        let table = LockTable::new();
        assert!(table.acquire(Xid(1), uid(1)).unwrap().is_none());
        assert_eq!(table.holder(uid(1)), Some(Xid(1)));

        // Re-acquiring a held lock is a no-op.
        assert!(table.acquire(Xid(1), uid(1)).unwrap().is_none());
    }

    #[test]
    fn test_contended_lock_waits_then_handed_over() {
        let table = LockTable::new();
        table.acquire(Xid(1), uid(1)).unwrap();

        let token = table.acquire(Xid(2), uid(1)).unwrap().unwrap();
        assert!(table.is_waiting(Xid(2)));

        table.remove(Xid(1));
        assert!(token.wait());
        assert_eq!(table.holder(uid(1)), Some(Xid(2)));
        assert!(!table.is_waiting(Xid(2)));

        // The grant is recorded, so releasing the new holder frees it.
        table.remove(Xid(2));
        assert_eq!(table.holder(uid(1)), None);
    }

    #[test]
    fn test_two_way_deadlock() {
        let table = LockTable::new();
        table.acquire(Xid(1), uid(1)).unwrap();
        table.acquire(Xid(2), uid(2)).unwrap();

        let token = table.acquire(Xid(1), uid(2)).unwrap();
        assert!(token.is_some());

        assert!(matches!(table.acquire(Xid(2), uid(1)), Err(Error::Deadlock)));
        assert!(!table.is_waiting(Xid(2)));
        assert!(table.is_waiting(Xid(1)));
    }

    #[test]
    fn test_three_way_deadlock() {
        let table = LockTable::new();
        for n in 1..=3 {
            table.acquire(Xid(n), uid(n as u16)).unwrap();
        }
        table.acquire(Xid(1), uid(2)).unwrap().unwrap();
        table.acquire(Xid(2), uid(3)).unwrap().unwrap();

        assert!(matches!(table.acquire(Xid(3), uid(1)), Err(Error::Deadlock)));
    }

    #[test]
    fn test_waiters_are_fifo() {
        let table = LockTable::new();
        table.acquire(Xid(1), uid(1)).unwrap();
        let t2 = table.acquire(Xid(2), uid(1)).unwrap().unwrap();
        let t3 = table.acquire(Xid(3), uid(1)).unwrap().unwrap();

        table.remove(Xid(1));
        assert!(t2.wait());
        assert_eq!(table.holder(uid(1)), Some(Xid(2)));

        table.remove(Xid(2));
        assert!(t3.wait());
        assert_eq!(table.holder(uid(1)), Some(Xid(3)));
    }

    #[test]
    fn test_cancelled_waiter_is_skipped() {
        let table = LockTable::new();
        table.acquire(Xid(1), uid(1)).unwrap();
        let t2 = table.acquire(Xid(2), uid(1)).unwrap().unwrap();
        let t3 = table.acquire(Xid(3), uid(1)).unwrap().unwrap();

        table.remove(Xid(2));
        assert!(!t2.wait());

        table.remove(Xid(1));
        assert!(t3.wait());
        assert_eq!(table.holder(uid(1)), Some(Xid(3)));
    }

    #[test]
    fn test_wait_blocks_across_threads() {
        let table = Arc::new(LockTable::new());
        table.acquire(Xid(1), uid(1)).unwrap();
        let token = table.acquire(Xid(2), uid(1)).unwrap().unwrap();

        let waiter = thread::spawn(move || token.wait());

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        table.remove(Xid(1));
        assert!(waiter.join().unwrap());
    }
}
