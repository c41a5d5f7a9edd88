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

//! Non-blocking hostname resolution backed by a fixed pool of worker
//! threads performing blocking lookups. The first call for a `(host, port)`
//! pair enqueues a background resolution and returns not-ready; subsequent
//! calls poll the shared result cache, which never expires for the life of
//! the resolver.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::info;

/// A single resolved address: an IP (v4 or v6) plus port. Two hostnames
/// that resolve to the same address share a `ResolvedAddr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedAddr {
    addr: IpAddr,
    port: u16,
}

impl ResolvedAddr {
    pub fn ip(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for ResolvedAddr {
    fn from(sa: SocketAddr) -> Self {
        Self {
            addr: sa.ip(),
            port: sa.port(),
        }
    }
}

/// `None` denotes a failed resolution (mirrors the original's `std::nullopt`
/// address on a non-zero `getaddrinfo` status).
type ResolutionOutcome = Option<ResolvedAddr>;

struct Request {
    host: String,
    port: String,
    key: String,
}

struct Shared {
    requests: Mutex<VecDeque<Request>>,
    requests_cv: Condvar,
    shutdown: AtomicBool,
    // `None` = still pending, `Some(outcome)` = resolved (possibly to failure).
    results: Mutex<HashMap<String, Option<ResolutionOutcome>>>,
}

pub struct AsyncDnsResolver {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncDnsResolver {
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            requests: Mutex::new(VecDeque::new()),
            requests_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            results: Mutex::new(HashMap::new()),
        });

        info!(workers = worker_count, "pooled async resolver starting");

        let workers = (0..worker_count)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Sizes the pool as `clamp(2 * available cores, min_workers, max_workers)`,
    /// matching the original's `clamp(get_nprocs() * 2, 4, 16)`.
    pub fn with_clamped_workers(min_workers: usize, max_workers: usize) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let count = (cores * 2).clamp(min_workers, max_workers);
        Self::new(count)
    }

    /// Returns `(ready, result)`. `ready=false` means the caller should poll
    /// again later; `ready=true` with `None` means resolution failed.
    pub fn resolve(&self, host: &str, port: &str) -> (bool, Option<ResolvedAddr>) {
        let key = format!("{host}:{port}");
        let mut results = self.shared.results.lock().unwrap();

        match results.get(&key) {
            None => {
                results.insert(key.clone(), None);
                drop(results);
                self.start_resolve(host.to_string(), port.to_string(), key);
                (false, None)
            }
            Some(None) => (false, None),
            Some(Some(outcome)) => (true, *outcome),
        }
    }

    fn start_resolve(&self, host: String, port: String, key: String) {
        self.shared
            .requests
            .lock()
            .unwrap()
            .push_back(Request { host, port, key });
        self.shared.requests_cv.notify_one();
    }

    fn shutdown_flag(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.requests_cv.notify_all();
    }
}

impl Drop for AsyncDnsResolver {
    fn drop(&mut self) {
        self.shutdown_flag();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let req = {
            let mut guard = shared.requests.lock().unwrap();
            let req = loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(req) = guard.pop_front() {
                    break req;
                }
                guard = shared.requests_cv.wait(guard).unwrap();
            };
            req
        };

        let outcome = resolve_sync(&req.host, &req.port);
        shared.results.lock().unwrap().insert(req.key, Some(outcome));
    }
}

/// Selects the first IPv4 address returned by the system resolver, falling
/// back to the first address of any family if no IPv4 address is present.
/// IPv6 is out of scope, matching the original's `AF_INET`-only hints.
fn resolve_sync(host: &str, port: &str) -> ResolutionOutcome {
    let port_num: u16 = port.parse().ok()?;

    let addrs = (host, port_num).to_socket_addrs().ok()?;

    let mut first_any = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr.into());
        }
        first_any.get_or_insert(addr);
    }

    first_any.map(ResolvedAddr::from)
}
