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

//! Host-grouped, slot-scheduled ready-URL producer. Draws batches from the
//! frontier, fans them out into per-host FIFO queues, and round-robins a
//! fixed number of "active slots" across hosts so that one prolific host
//! cannot starve the others.

use crate::clock::Clock;
use crate::frontier::scoring::{DefaultScorer, UrlScorer};
use crate::frontier::UrlFrontier;
use crate::sync::ThreadSynchronizer;
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

struct HostRecord {
    crawl_delay_ms: i64,
    earliest_next_crawl: i64,
    queue: VecDeque<String>,
    active_slot: Option<usize>,
}

pub struct MiddleQueue<S: UrlScorer = DefaultScorer> {
    frontier: Arc<Mutex<UrlFrontier<S>>>,
    clock: Arc<dyn Clock>,

    n: usize,
    url_batch_size: usize,
    host_url_limit: usize,
    utilization_target: f64,
    default_crawl_delay_ms: i64,

    k: usize,
    hosts: HashMap<String, HostRecord>,
    slots: Vec<Option<String>>,
    empty_slots: Vec<usize>,
    total_queued_urls: usize,
}

impl<S: UrlScorer> MiddleQueue<S> {
    pub fn new(
        frontier: Arc<Mutex<UrlFrontier<S>>>,
        clock: Arc<dyn Clock>,
        num_slots: usize,
        url_batch_size: usize,
        host_url_limit: usize,
        utilization_target: f64,
        default_crawl_delay_ms: i64,
    ) -> Self {
        let empty_slots = (0..num_slots).rev().collect();
        Self {
            frontier,
            clock,
            n: num_slots,
            url_batch_size,
            host_url_limit,
            utilization_target,
            default_crawl_delay_ms,
            k: 0,
            hosts: HashMap::new(),
            slots: vec![None; num_slots],
            empty_slots,
            total_queued_urls: 0,
        }
    }

    pub fn active_queue_count(&self) -> usize {
        self.n - self.empty_slots.len()
    }

    pub fn queue_utilization(&self) -> f64 {
        self.active_queue_count() as f64 / self.n as f64
    }

    pub fn total_queued_urls(&self) -> usize {
        self.total_queued_urls
    }

    /// Re-admits a previously extracted batch of URLs (see
    /// [`extract_queued_urls`](Self::extract_queued_urls)) via the normal
    /// accept path. Per-host order is preserved; `earliest_next_crawl` is
    /// reset to "now" for every host touched.
    pub fn restore_from(&mut self, urls: Vec<String>) {
        let now = self.clock.now_ms();
        for url in urls {
            self.accept_url(now, url);
        }
    }

    /// Drains every per-host queue into a flat list, for persistence across
    /// restarts. Slot assignments are dropped; `restore_from` reassigns them.
    pub fn extract_queued_urls(&mut self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.total_queued_urls);
        for record in self.hosts.values_mut() {
            out.extend(record.queue.drain(..));
        }
        self.total_queued_urls = 0;
        for slot in &mut self.slots {
            *slot = None;
        }
        self.empty_slots = (0..self.n).rev().collect();
        for record in self.hosts.values_mut() {
            record.active_slot = None;
        }
        out
    }

    /// Returns up to `max` ready URLs. If `at_least_one` is set and the
    /// frontier is currently empty, blocks (polling, so shutdown is observed
    /// promptly) until at least one URL is available or `sync` requests
    /// shutdown/pause.
    pub fn get_urls(
        &mut self,
        sync: &ThreadSynchronizer,
        max: usize,
        at_least_one: bool,
    ) -> crate::error::Result<Vec<String>> {
        let target_total = self.n * self.url_batch_size;

        if self.total_queued_urls < target_total || self.queue_utilization() < self.utilization_target
        {
            if self.queue_utilization() < self.utilization_target {
                self.clean_empty_hosts();
            }

            loop {
                let got = {
                    let hosts = &self.hosts;
                    let host_url_limit = self.host_url_limit;
                    let mut admitted_this_batch: HashMap<String, usize> = HashMap::new();
                    let mut frontier = self.frontier.lock().unwrap();
                    frontier.pop_urls(target_total, move |url| {
                        want_url(hosts, host_url_limit, &mut admitted_this_batch, url)
                    })?
                };

                if sync.should_synchronize() {
                    return Ok(Vec::new());
                }

                debug!(
                    got = got.len(),
                    target = target_total,
                    at_least_one,
                    "middle queue refill"
                );

                if !got.is_empty() {
                    let now = self.clock.now_ms();
                    for url in got {
                        self.accept_url(now, url);
                    }
                    break;
                }

                if !at_least_one {
                    break;
                }

                std::thread::sleep(std::time::Duration::from_millis(20));
                if sync.should_synchronize() {
                    return Ok(Vec::new());
                }
            }
        }

        let now = self.clock.now_ms();
        let mut out = Vec::new();
        let max_possible_ready = max.min(self.n);

        for _ in 0..self.n {
            let idx = self.k;
            self.k = (self.k + 1) % self.n;

            let host = match &self.slots[idx] {
                Some(h) => h.clone(),
                None => continue,
            };

            let ready = {
                let record = self.hosts.get(&host).expect("slot points at a live host");
                !record.queue.is_empty() && now >= record.earliest_next_crawl
            };
            if !ready {
                continue;
            }

            out.push(self.pop_from_host(now, &host));
            if out.len() >= max_possible_ready {
                break;
            }
        }

        Ok(out)
    }

    fn accept_url(&mut self, now: i64, url: String) {
        let Some(host) = crate::url_ext::host(&url) else {
            return;
        };

        if self.hosts.contains_key(&host) {
            self.push_url_for_host(url, &host);
        } else {
            self.push_url_for_new_host(now, url, host);
        }
    }

    fn push_url_for_host(&mut self, url: String, host: &str) {
        let record = self.hosts.get_mut(host).expect("host exists");
        record.queue.push_back(url);
        self.total_queued_urls += 1;

        if record.active_slot.is_none() && !self.empty_slots.is_empty() {
            self.assign_free_slot(host);
        }
    }

    fn push_url_for_new_host(&mut self, now: i64, url: String, host: String) {
        self.hosts.insert(
            host.clone(),
            HostRecord {
                crawl_delay_ms: self.default_crawl_delay_ms,
                earliest_next_crawl: now,
                queue: VecDeque::new(),
                active_slot: None,
            },
        );
        self.push_url_for_host(url, &host);
    }

    fn pop_from_host(&mut self, now: i64, host: &str) -> String {
        let (url, now_empty, slot) = {
            let record = self.hosts.get_mut(host).expect("host exists");
            debug_assert!(!record.queue.is_empty());
            debug_assert!(record.earliest_next_crawl <= now);
            debug_assert!(record.active_slot.is_some());

            let url = record.queue.pop_front().expect("checked non-empty");
            record.earliest_next_crawl = now + record.crawl_delay_ms;

            (url, record.queue.is_empty(), record.active_slot)
        };

        self.total_queued_urls -= 1;

        if now_empty {
            let slot = slot.expect("active host always has a slot");
            self.slots[slot] = None;
            self.empty_slots.push(slot);
            self.hosts.get_mut(host).expect("host exists").active_slot = None;
            self.populate_active_slots();
        }

        url
    }

    fn populate_active_slots(&mut self) {
        let hosts_to_assign: Vec<String> = self
            .hosts
            .iter()
            .filter(|(_, record)| record.active_slot.is_none() && !record.queue.is_empty())
            .take(self.empty_slots.len())
            .map(|(host, _)| host.clone())
            .collect();

        for host in hosts_to_assign {
            if self.empty_slots.is_empty() {
                break;
            }
            self.assign_free_slot(&host);
        }
    }

    fn clean_empty_hosts(&mut self) {
        self.hosts.retain(|_, record| {
            if record.queue.is_empty() {
                debug_assert!(record.active_slot.is_none());
                false
            } else {
                true
            }
        });
    }

    fn assign_free_slot(&mut self, host: &str) {
        let slot = self.empty_slots.pop().expect("caller checked non-empty");
        self.slots[slot] = Some(host.to_string());
        self.hosts.get_mut(host).expect("host exists").active_slot = Some(slot);
    }
}

/// Pure with respect to frontier state: reads the host map as it stood
/// before this refill call, plus a per-call running tally of URLs already
/// admitted for each host in the batch being assembled right now. Without
/// the running tally, a host with no existing record would pass every
/// candidate in its first-ever batch regardless of `host_url_limit`, since
/// its queue only grows once the whole batch is accepted.
fn want_url(
    hosts: &HashMap<String, HostRecord>,
    host_url_limit: usize,
    admitted_this_batch: &mut HashMap<String, usize>,
    url: &str,
) -> bool {
    let Some(host) = crate::url_ext::host(url) else {
        return true;
    };

    let existing = hosts.get(&host).map(|r| r.queue.len()).unwrap_or(0);
    let pending = admitted_this_batch.entry(host).or_insert(0);

    if existing + *pending < host_url_limit {
        *pending += 1;
        true
    } else {
        false
    }
}
