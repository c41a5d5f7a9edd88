// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Shutdown/pause rendezvous shared by every worker thread in the system.
//!
//! A worker calls [`ThreadSynchronizer::maybe_pause`] between units of work;
//! the coordinator calls [`ThreadSynchronizer::start_pause`] to bring every
//! registered worker to a halt (for a consistent on-disk snapshot) and
//! [`ThreadSynchronizer::end_pause`] to release them again. [`shutdown`]
//! wakes everyone immediately and is permanent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct Inner {
    mu: Mutex<()>,
    all_paused_cv: Condvar,
    unpause_cv: Condvar,
    wants_notifies: Mutex<Vec<Arc<Condvar>>>,
    num_paused: AtomicUsize,
    should_pause: AtomicBool,
    shutdown: AtomicBool,
}

/// Cheaply cloneable handle; all clones share the same rendezvous state.
#[derive(Clone)]
pub struct ThreadSynchronizer {
    inner: Arc<Inner>,
}

impl Default for ThreadSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSynchronizer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                mu: Mutex::new(()),
                all_paused_cv: Condvar::new(),
                unpause_cv: Condvar::new(),
                wants_notifies: Mutex::new(Vec::new()),
                num_paused: AtomicUsize::new(0),
                should_pause: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a condition variable to be woken on shutdown or pause. The
    /// caller is responsible for also waiting on `cv` itself; this only
    /// ensures it gets notified.
    pub fn register_cv(&self, cv: Arc<Condvar>) {
        self.inner.wants_notifies.lock().unwrap().push(cv);
    }

    pub fn should_synchronize(&self) -> bool {
        self.should_shutdown() || self.should_pause()
    }

    pub fn should_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    pub fn should_pause(&self) -> bool {
        self.inner.should_pause.load(Ordering::SeqCst)
    }

    /// Blocks the caller while a pause is in effect. Returns immediately if
    /// no pause has been requested.
    pub fn maybe_pause(&self) {
        if !self.inner.should_pause.load(Ordering::SeqCst) {
            return;
        }
        self.do_pause();
    }

    fn do_pause(&self) {
        let mut guard = self.inner.mu.lock().unwrap();
        if !self.inner.should_pause.load(Ordering::SeqCst) {
            return;
        }

        self.inner.num_paused.fetch_add(1, Ordering::SeqCst);
        self.inner.all_paused_cv.notify_one();
        for cv in self.inner.wants_notifies.lock().unwrap().iter() {
            cv.notify_all();
        }

        loop {
            if !self.inner.should_pause.load(Ordering::SeqCst)
                || self.inner.shutdown.load(Ordering::SeqCst)
            {
                break;
            }
            guard = self.inner.unpause_cv.wait(guard).unwrap();
        }

        self.inner.num_paused.fetch_sub(1, Ordering::SeqCst);
    }

    /// Idempotent. Permanently wakes every registered waiter.
    pub fn shutdown(&self) {
        let _guard = self.inner.mu.lock().unwrap();
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.unpause_cv.notify_all();
        for cv in self.inner.wants_notifies.lock().unwrap().iter() {
            cv.notify_all();
        }
    }

    /// Sets the pause flag and blocks until exactly `n` workers have entered
    /// [`maybe_pause`].
    pub fn start_pause(&self, n: usize) {
        let guard = self.inner.mu.lock().unwrap();
        self.inner.should_pause.store(true, Ordering::SeqCst);
        let _guard = self
            .inner
            .all_paused_cv
            .wait_while(guard, |_| self.inner.num_paused.load(Ordering::SeqCst) != n)
            .unwrap();
    }

    pub fn end_pause(&self) {
        let _guard = self.inner.mu.lock().unwrap();
        self.inner.should_pause.store(false, Ordering::SeqCst);
        self.inner.unpause_cv.notify_all();
    }

    pub fn num_paused(&self) -> usize {
        self.inner.num_paused.load(Ordering::SeqCst)
    }
}
