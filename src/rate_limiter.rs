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

//! Fixed-window rate limiting keyed by resolved address, not hostname — two
//! hostnames that resolve to the same IP share a bucket. Backed by the async
//! resolver for name lookups and two LRU caches (resolved-address cache,
//! bucket-entry map) of equal capacity.

use crate::resolver::{AsyncDnsResolver, ResolvedAddr};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    bucket_start: i64,
    bucket_count: u32,
}

struct State {
    entries: LruCache<ResolvedAddr, Entry>,
    addrs: LruCache<String, ResolvedAddr>,
}

pub struct HostRateLimiter {
    state: Mutex<State>,
    requests_per_window: u32,
    window_ms: i64,
}

impl HostRateLimiter {
    pub fn new(requests_per_window: u32, window_ms: i64, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        Self {
            state: Mutex::new(State {
                entries: LruCache::new(capacity),
                addrs: LruCache::new(capacity),
            }),
            requests_per_window,
            window_ms,
        }
    }

    /// Returns the number of milliseconds the caller should wait before
    /// retrying, or `0` if the request is admitted immediately. A return of
    /// `10` means the address has not resolved yet.
    pub fn try_use(
        &self,
        resolver: &AsyncDnsResolver,
        host: &str,
        port: &str,
        now_ms: i64,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();

        let entry_addr = match get_or_resolve(&mut state, resolver, host, port) {
            None => return 10,
            Some(None) => {
                debug!(host, port, "resolution failed, admitting request");
                return 0;
            }
            Some(Some(addr)) => addr,
        };

        let entry = *state.entries.get_or_insert_mut(entry_addr, Entry::default);

        self.try_increment_bucket(&mut state, entry_addr, entry, now_ms)
    }

    fn try_increment_bucket(
        &self,
        state: &mut State,
        addr: ResolvedAddr,
        mut entry: Entry,
        now_ms: i64,
    ) -> i64 {
        if now_ms - entry.bucket_start >= self.window_ms {
            entry.bucket_start = now_ms;
            entry.bucket_count = 0;
        }

        let wait = if entry.bucket_count >= self.requests_per_window {
            self.window_ms - (now_ms - entry.bucket_start)
        } else {
            entry.bucket_count += 1;
            0
        };

        state.entries.put(addr, entry);
        wait
    }
}

/// Returns `None` while the address is still resolving, `Some(None)` if
/// resolution failed, and `Some(Some(addr))` once an address is known.
fn get_or_resolve(
    state: &mut State,
    resolver: &AsyncDnsResolver,
    host: &str,
    port: &str,
) -> Option<Option<ResolvedAddr>> {
    let combined = format!("{host}:{port}");

    if let Some(existing) = state.addrs.get(&combined) {
        return Some(Some(*existing));
    }

    let (ready, result) = resolver.resolve(host, port);
    if !ready {
        return None;
    }

    match result {
        Some(addr) => {
            state.addrs.put(combined, addr);
            Some(Some(addr))
        }
        None => Some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::AsyncDnsResolver;

    #[test]
    fn admits_up_to_limit_then_waits() {
        let resolver = AsyncDnsResolver::new(1);
        let limiter = HostRateLimiter::new(3, 60_000, 100);

        // Drain the resolver until the address is ready (loopback resolves
        // essentially immediately on a local machine).
        let mut now = 0i64;
        loop {
            let wait = limiter.try_use(&resolver, "localhost", "80", now);
            if wait != 10 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
            now += 5;
        }

        let mut admitted = 0;
        for _ in 0..3 {
            let wait = limiter.try_use(&resolver, "localhost", "80", now);
            assert_eq!(wait, 0);
            admitted += 1;
        }
        assert_eq!(admitted, 3);

        let wait = limiter.try_use(&resolver, "localhost", "80", now);
        assert!(wait > 0);
    }

    #[test]
    fn window_resets_after_duration() {
        let resolver = AsyncDnsResolver::new(1);
        let limiter = HostRateLimiter::new(1, 1_000, 100);

        let mut now = 0i64;
        loop {
            let wait = limiter.try_use(&resolver, "localhost", "81", now);
            if wait != 10 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
            now += 5;
        }

        assert_eq!(limiter.try_use(&resolver, "localhost", "81", now), 0);
        assert!(limiter.try_use(&resolver, "localhost", "81", now) > 0);
        assert_eq!(limiter.try_use(&resolver, "localhost", "81", now + 1_000), 0);
    }

    use proptest::prelude::*;

    fn fresh_state() -> State {
        State {
            entries: LruCache::new(NonZeroUsize::new(1).unwrap()),
            addrs: LruCache::new(NonZeroUsize::new(1).unwrap()),
        }
    }

    proptest! {
        #[test]
        fn bucket_count_never_exceeds_limit_within_a_window(
            requests_per_window in 1u32..20,
            window_ms in 10i64..10_000,
            deltas in proptest::collection::vec(0i64..500, 1..200),
        ) {
            let limiter = HostRateLimiter::new(requests_per_window, window_ms, 16);
            let mut state = fresh_state();
            let addr: ResolvedAddr = std::net::SocketAddr::from(([127, 0, 0, 1], 80)).into();

            let mut now = 0i64;
            let mut entry = Entry::default();
            entry.bucket_start = now;

            for delta in deltas {
                now += delta;
                let wait = limiter.try_increment_bucket(&mut state, addr, entry, now);
                entry = *state.entries.peek(&addr).unwrap();

                prop_assert!(entry.bucket_count <= requests_per_window);
                if wait > 0 {
                    prop_assert!(entry.bucket_count >= requests_per_window);
                }
            }
        }
    }
}
