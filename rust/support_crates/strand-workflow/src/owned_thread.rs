//! Owning thread handles that join on drop.
//!
//! This module provides [`ThreadOwner`], a handle that exclusively owns one running
//! OS thread. The handle can be moved but never cloned, and if it is dropped while
//! the thread is still joinable the drop blocks until the thread terminates. A unit
//! of work therefore never outlives the handle that started it.
//!
//! ## Handle Types
//!
//! - [`OwnedThread<R>`]: for work with a `'static` lifetime; everything the closure
//!   uses must be moved into it.
//! - [`ScopedOwnedThread<'scope, R>`]: for work spawned inside
//!   [`std::thread::scope`], which may borrow data that outlives the scope.
//!
//! ## Lifecycle
//!
//! 1. **Running**: created by `create`, `create_named` or `adopt`
//! 2. **Joined**: after a successful or failed [`join`](ThreadOwner::join)
//! 3. **Detached**: after [`detach`](ThreadOwner::detach); the handle no longer waits
//!
//! Joining or detaching a handle that is not running fails with `InvalidState`.
//! A panic inside the unit of work is caught by the runtime and re-surfaced by
//! `join` as `WorkerPanicked`; it never crosses to the owning thread implicitly.

use std::thread::{self, JoinHandle, ScopedJoinHandle, Thread, ThreadId};

use strand_common::{Result, error::Error};

mod sealed {
    pub trait Sealed {}
    impl<R> Sealed for std::thread::JoinHandle<R> {}
    impl<R> Sealed for std::thread::ScopedJoinHandle<'_, R> {}
}

/// The raw join handles a [`ThreadOwner`] can own.
///
/// Implemented for [`std::thread::JoinHandle`] and [`std::thread::ScopedJoinHandle`];
/// it cannot be implemented outside this crate.
pub trait RawThread: sealed::Sealed {
    type Output;

    fn join_raw(self) -> thread::Result<Self::Output>;

    fn thread(&self) -> &Thread;

    fn is_finished(&self) -> bool;
}

impl<R> RawThread for JoinHandle<R> {
    type Output = R;

    fn join_raw(self) -> thread::Result<R> {
        self.join()
    }

    fn thread(&self) -> &Thread {
        JoinHandle::thread(self)
    }

    fn is_finished(&self) -> bool {
        JoinHandle::is_finished(self)
    }
}

impl<R> RawThread for ScopedJoinHandle<'_, R> {
    type Output = R;

    fn join_raw(self) -> thread::Result<R> {
        self.join()
    }

    fn thread(&self) -> &Thread {
        ScopedJoinHandle::thread(self)
    }

    fn is_finished(&self) -> bool {
        ScopedJoinHandle::is_finished(self)
    }
}

/// A handle owning a thread whose work has a `'static` lifetime.
pub type OwnedThread<R> = ThreadOwner<JoinHandle<R>>;

/// A handle owning a thread spawned inside a [`std::thread::scope`].
pub type ScopedOwnedThread<'scope, R> = ThreadOwner<ScopedJoinHandle<'scope, R>>;

enum State<H> {
    Running(H),
    Joined,
    Detached,
}

/// Exclusive owner of one running thread. See the [module docs](self).
pub struct ThreadOwner<H: RawThread> {
    state: State<H>,
}

impl<R: Send + 'static> ThreadOwner<JoinHandle<R>> {
    /// Starts a new OS thread running `f` and returns the handle owning it.
    ///
    /// Exactly one thread is created per call; there is no pooling.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the operating system refuses to create the thread.
    pub fn create<F>(f: F) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self::spawn_with(thread::Builder::new(), f)
    }

    /// Like [`create`](Self::create), but gives the thread a name that shows up in
    /// debuggers and panic messages.
    pub fn create_named<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self::spawn_with(thread::Builder::new().name(name.into()), f)
    }

    /// Takes ownership of a thread started elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if there is no thread to adopt.
    pub fn adopt(handle: Option<JoinHandle<R>>) -> Result<Self> {
        let handle = handle.ok_or_else(|| Error::invalid_state("adopt", "no thread"))?;
        Ok(Self::running(handle))
    }

    fn spawn_with<F>(builder: thread::Builder, f: F) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let handle = builder
            .spawn(f)
            .map_err(|e| Error::spawn("owned thread", e))?;
        log::debug!("spawned owned thread {:?}", handle.thread().id());
        Ok(Self::running(handle))
    }
}

impl<'scope, R: Send + 'scope> ThreadOwner<ScopedJoinHandle<'scope, R>> {
    /// Starts a new OS thread within `scope` running `f`.
    ///
    /// `f` may borrow anything that outlives `scope`. The scope itself also waits
    /// for the thread before returning, so even a detached scoped thread cannot
    /// outlive the borrowed data.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the operating system refuses to create the thread.
    pub fn create<'env, F>(scope: &'scope thread::Scope<'scope, 'env>, f: F) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'scope,
    {
        Self::spawn_scoped_with(scope, thread::Builder::new(), f)
    }

    /// Like [`create`](Self::create), with a thread name.
    pub fn create_named<'env, F>(
        scope: &'scope thread::Scope<'scope, 'env>,
        name: impl Into<String>,
        f: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'scope,
    {
        Self::spawn_scoped_with(scope, thread::Builder::new().name(name.into()), f)
    }

    fn spawn_scoped_with<'env, F>(
        scope: &'scope thread::Scope<'scope, 'env>,
        builder: thread::Builder,
        f: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'scope,
    {
        let handle = builder
            .spawn_scoped(scope, f)
            .map_err(|e| Error::spawn("scoped owned thread", e))?;
        log::trace!("spawned scoped thread {:?}", handle.thread().id());
        Ok(Self::running(handle))
    }
}

impl<H: RawThread> ThreadOwner<H> {
    fn running(handle: H) -> Self {
        ThreadOwner {
            state: State::Running(handle),
        }
    }

    /// Blocks until the owned thread terminates and returns its result.
    ///
    /// The handle is *joined* afterwards, whether or not the work succeeded.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the handle was already joined or detached.
    /// - `WorkerPanicked` if the unit of work panicked.
    pub fn join(&mut self) -> Result<H::Output> {
        match std::mem::replace(&mut self.state, State::Joined) {
            State::Running(handle) => Self::join_handle(handle),
            State::Joined => Err(Error::invalid_state("join", "thread already joined")),
            State::Detached => {
                self.state = State::Detached;
                Err(Error::invalid_state("join", "thread was detached"))
            }
        }
    }

    /// Gives up responsibility for the owned thread; dropping the handle will no
    /// longer wait for it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle was already joined or detached.
    pub fn detach(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Detached) {
            // Dropping a raw handle detaches its thread.
            State::Running(_) => Ok(()),
            State::Joined => {
                self.state = State::Joined;
                Err(Error::invalid_state("detach", "thread already joined"))
            }
            State::Detached => Err(Error::invalid_state("detach", "thread was detached")),
        }
    }

    /// Takes ownership of `other`'s thread, first joining the thread currently
    /// owned by `self` (if it is still joinable).
    ///
    /// Returns the previous thread's result, or `None` if `self` was not joinable.
    /// Ownership of `other`'s thread is transferred even if joining the previous
    /// thread fails.
    pub fn replace(&mut self, mut other: Self) -> Result<Option<H::Output>> {
        let incoming = std::mem::replace(&mut other.state, State::Detached);
        match std::mem::replace(&mut self.state, incoming) {
            State::Running(previous) => Self::join_handle(previous).map(Some),
            State::Joined | State::Detached => Ok(None),
        }
    }

    /// Returns `true` if the handle still owns a running (or finished but not yet
    /// joined) thread.
    pub fn is_joinable(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Returns `true` if the owned thread has finished running. Always `false`
    /// once the handle is joined or detached.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Running(handle) => handle.is_finished(),
            State::Joined | State::Detached => false,
        }
    }

    /// Identifier of the owned thread, if the handle is joinable.
    pub fn id(&self) -> Option<ThreadId> {
        match &self.state {
            State::Running(handle) => Some(handle.thread().id()),
            State::Joined | State::Detached => None,
        }
    }

    /// Name of the owned thread, if it has one and the handle is joinable.
    pub fn name(&self) -> Option<&str> {
        match &self.state {
            State::Running(handle) => handle.thread().name(),
            State::Joined | State::Detached => None,
        }
    }

    /// Joins every handle, in order, and collects their results.
    ///
    /// All handles are joined even if some of them fail; the first failure (in
    /// iteration order) is then returned.
    pub fn join_all(handles: impl IntoIterator<Item = Self>) -> Result<Vec<H::Output>> {
        let outcomes = handles
            .into_iter()
            .map(|mut handle| handle.join())
            .collect::<Vec<_>>();
        outcomes.into_iter().collect()
    }

    fn join_handle(handle: H) -> Result<H::Output> {
        let id = handle.thread().id();
        let res = handle.join_raw().map_err(Error::worker_panicked);
        log::trace!("joined thread {id:?}");
        res
    }
}

impl<H: RawThread> Drop for ThreadOwner<H> {
    fn drop(&mut self) {
        if let State::Running(handle) = std::mem::replace(&mut self.state, State::Joined) {
            if let Err(e) = Self::join_handle(handle) {
                log::warn!("owned thread failed before its handle was dropped: {e}");
            }
        }
    }
}

impl<H: RawThread> std::fmt::Debug for ThreadOwner<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Running(_) => "running",
            State::Joined => "joined",
            State::Detached => "detached",
        };
        f.debug_struct("ThreadOwner")
            .field("state", &state)
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use strand_common::error::ErrorKind;

    use super::{OwnedThread, ScopedOwnedThread};

    #[test]
    fn test_owned_thread_send() {
        fn is_send<T: Send>() {}
        is_send::<OwnedThread<usize>>();
        is_send::<OwnedThread<Vec<String>>>();
    }

    #[test]
    fn test_create_and_join() {
        let mut t = OwnedThread::create(|| 6 * 7).unwrap();
        assert!(t.is_joinable());
        assert!(t.id().is_some());
        assert_eq!(t.join().unwrap(), 42);
        assert!(!t.is_joinable());
        assert!(t.id().is_none());
    }

    #[test]
    fn test_double_join_is_invalid_state() {
        let mut t = OwnedThread::create(|| ()).unwrap();
        t.join().unwrap();
        let err = t.join().unwrap_err();
        assert!(err.is_invalid_state());
        // Still in a consistent state afterwards.
        assert!(t.join().unwrap_err().is_invalid_state());
        assert!(t.detach().unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_detach() {
        let (tx, rx) = mpsc::channel();
        let mut t = OwnedThread::create(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(1u8).unwrap();
        })
        .unwrap();
        t.detach().unwrap();
        assert!(!t.is_joinable());
        assert!(t.join().unwrap_err().is_invalid_state());
        assert!(t.detach().unwrap_err().is_invalid_state());
        drop(t);
        // The detached thread keeps running on its own.
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_drop_waits_for_completion() {
        let finished = Arc::new(AtomicBool::new(false));
        {
            let finished = finished.clone();
            let _t = OwnedThread::create(move || {
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_is_resurfaced_on_join() {
        let mut t = OwnedThread::create(|| -> u32 { panic!("boom") }).unwrap();
        let err = t.join().unwrap_err();
        match err.kind() {
            ErrorKind::WorkerPanicked { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!t.is_joinable());
    }

    #[test]
    fn test_drop_after_panic_does_not_propagate() {
        let t = OwnedThread::<()>::create(|| panic!("dropped while failing")).unwrap();
        drop(t);
    }

    #[test]
    fn test_move_transfers_ownership() {
        fn finish(mut t: OwnedThread<String>) -> String {
            t.join().unwrap()
        }

        let t = OwnedThread::create_named("mover", || "moved".to_string()).unwrap();
        assert_eq!(t.name(), Some("mover"));
        let handles = vec![t];
        let t = handles.into_iter().next().unwrap();
        assert_eq!(finish(t), "moved");
    }

    #[test]
    fn test_adopt() {
        assert!(OwnedThread::<()>::adopt(None).unwrap_err().is_invalid_state());

        let mut t = OwnedThread::adopt(Some(thread::spawn(|| 5))).unwrap();
        assert_eq!(t.join().unwrap(), 5);
    }

    #[test]
    fn test_replace_joins_previous() {
        let mut t = OwnedThread::create(|| 1).unwrap();
        let previous = t.replace(OwnedThread::create(|| 2).unwrap()).unwrap();
        assert_eq!(previous, Some(1));
        assert_eq!(t.join().unwrap(), 2);

        let previous = t.replace(OwnedThread::create(|| 3).unwrap()).unwrap();
        assert_eq!(previous, None);
        assert_eq!(t.join().unwrap(), 3);
    }

    #[test]
    fn test_replace_keeps_incoming_when_previous_panicked() {
        let mut t = OwnedThread::create(|| -> i32 { panic!("old") }).unwrap();
        let err = t.replace(OwnedThread::create(|| 9).unwrap()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::WorkerPanicked { .. }));
        assert_eq!(t.join().unwrap(), 9);
    }

    #[test]
    fn test_join_all_joins_everything() {
        let completed = Arc::new(AtomicUsize::new(0));
        let handles = (0..20)
            .map(|i| {
                let completed = completed.clone();
                OwnedThread::create(move || {
                    thread::sleep(Duration::from_millis(5));
                    completed.fetch_add(1, Ordering::SeqCst);
                    if i == 3 {
                        panic!("worker {i} failed");
                    }
                    i
                })
                .unwrap()
            })
            .collect::<Vec<_>>();

        let err = OwnedThread::join_all(handles).unwrap_err();
        assert!(err.to_string().contains("worker 3 failed"));
        assert_eq!(completed.load(Ordering::SeqCst), 20);

        let handles = (0..8)
            .map(|i| OwnedThread::create(move || i * i).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            OwnedThread::join_all(handles).unwrap(),
            (0..8).map(|i| i * i).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_scoped_thread_borrows_local_data() {
        let data = (1..=100).collect::<Vec<u64>>();
        let (first, second) = data.split_at(50);

        let total = thread::scope(|s| {
            let mut a = ScopedOwnedThread::create(s, || first.iter().sum::<u64>()).unwrap();
            let mut b =
                ScopedOwnedThread::create_named(s, "second-half", || second.iter().sum::<u64>())
                    .unwrap();
            assert_eq!(b.name(), Some("second-half"));
            a.join().unwrap() + b.join().unwrap()
        });
        assert_eq!(total, 5050);
    }

    #[test]
    fn test_scoped_drop_joins_before_scope_end() {
        let counter = AtomicUsize::new(0);
        thread::scope(|s| {
            {
                let _t = ScopedOwnedThread::create(s, || {
                    thread::sleep(Duration::from_millis(20));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
            // The handle was dropped above, which waited for the work.
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        });
    }
}
