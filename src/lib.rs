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

//! Polite, concurrent crawl scheduler: a durable de-duplicated URL frontier,
//! a host-fair middle queue, a per-address rate limiter, a pooled DNS
//! resolver, and the thread-synchronization rendezvous tying them together
//! for pause/shutdown.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frontier;
pub mod middle_queue;
pub mod rate_limiter;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod url_ext;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use frontier::UrlFrontier;
pub use middle_queue::MiddleQueue;
pub use rate_limiter::HostRateLimiter;
pub use resolver::AsyncDnsResolver;
pub use sync::ThreadSynchronizer;
