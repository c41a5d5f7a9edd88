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

//! `key = value` config file loader, one directive per line, `#` for
//! comments. Deliberately not TOML: this mirrors the crawler's own on-disk
//! format rather than the rest of the workspace's `toml`-based configs,
//! since repeatable `seed_url` lines don't map cleanly onto a single TOML
//! table.

use crate::error::Error;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub concurrent_requests: usize,
    pub request_timeout: Duration,
    pub seed_urls: Vec<String>,
    pub data_directory: String,
    pub default_crawl_delay_ms: i64,

    pub middle_queue_queue_count: usize,
    pub middle_queue_url_batch_size: usize,
    pub middle_queue_host_url_limit: usize,
    pub middle_queue_utilization_target: f64,

    pub concurrent_robots_requests: usize,
    pub metrics_port: u16,
    pub snapshot_period_seconds: u64,

    pub user_agent: String,
    pub rate_limiter_requests_per_window: u32,
    pub rate_limiter_window_ms: i64,
    pub rate_limiter_cache_capacity: usize,
    pub resolver_min_workers: usize,
    pub resolver_max_workers: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            concurrent_requests: 10,
            request_timeout: Duration::from_secs(10),
            seed_urls: Vec::new(),
            data_directory: "data/frontier".to_string(),
            default_crawl_delay_ms: 1_000,

            middle_queue_queue_count: 256,
            middle_queue_url_batch_size: 50,
            middle_queue_host_url_limit: 200,
            middle_queue_utilization_target: 0.8,

            concurrent_robots_requests: 10,
            metrics_port: 9180,
            snapshot_period_seconds: 300,

            user_agent: "crawl-frontier".to_string(),
            rate_limiter_requests_per_window: 60,
            rate_limiter_window_ms: 60_000,
            rate_limiter_cache_capacity: 50_000,
            resolver_min_workers: 4,
            resolver_max_workers: 16,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> crate::error::Result<Self> {
        let mut config = Config::default();

        for (idx, raw_line) in contents.lines().enumerate() {
            let line_number = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::InvalidConfig {
                    line: line_number,
                    message: "missing '='".to_string(),
                }
                .into());
            };
            let key = key.trim();
            let value = value.trim();

            config.apply(key, value, line_number)?;
        }

        if config.seed_urls.is_empty() {
            return Err(Error::NoSeedUrls.into());
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str, line: usize) -> crate::error::Result<()> {
        let parse_usize = |v: &str| -> crate::error::Result<usize> {
            v.parse().map_err(|_| {
                Error::InvalidConfig {
                    line,
                    message: format!("expected a non-negative integer, got '{v}'"),
                }
                .into()
            })
        };
        let parse_i64 = |v: &str| -> crate::error::Result<i64> {
            v.parse().map_err(|_| {
                Error::InvalidConfig {
                    line,
                    message: format!("expected an integer, got '{v}'"),
                }
                .into()
            })
        };
        let parse_f64 = |v: &str| -> crate::error::Result<f64> {
            v.parse().map_err(|_| {
                Error::InvalidConfig {
                    line,
                    message: format!("expected a number, got '{v}'"),
                }
                .into()
            })
        };

        match key {
            "workers" => {
                self.workers = parse_usize(value)?;
                if self.workers == 0 {
                    return Err(Error::InvalidConfig {
                        line,
                        message: "workers must be > 0".to_string(),
                    }
                    .into());
                }
            }
            "concurrent_requests" => {
                self.concurrent_requests = parse_usize(value)?;
                if self.concurrent_requests == 0 {
                    return Err(Error::InvalidConfig {
                        line,
                        message: "concurrent_requests must be > 0".to_string(),
                    }
                    .into());
                }
            }
            "request_timeout" => {
                self.request_timeout = Duration::from_secs(parse_usize(value)? as u64);
            }
            "seed_url" => {
                if !value.is_empty() {
                    self.seed_urls.push(value.to_string());
                }
            }
            "data_directory" => self.data_directory = value.to_string(),
            "default_crawl_delay_ms" => self.default_crawl_delay_ms = parse_i64(value)?,
            "middle_queue.queue_count" => self.middle_queue_queue_count = parse_usize(value)?,
            "middle_queue.url_batch_size" => {
                self.middle_queue_url_batch_size = parse_usize(value)?
            }
            "middle_queue.host_url_limit" => {
                self.middle_queue_host_url_limit = parse_usize(value)?
            }
            "middle_queue.utilization_target" => {
                self.middle_queue_utilization_target = parse_f64(value)?
            }
            "concurrent_robots_requests" => {
                self.concurrent_robots_requests = parse_usize(value)?
            }
            "metrics_port" => {
                self.metrics_port = parse_usize(value)?.try_into().map_err(|_| Error::InvalidConfig {
                    line,
                    message: "metrics_port must fit in 16 bits".to_string(),
                })?;
            }
            "snapshot_period_seconds" => {
                self.snapshot_period_seconds = parse_usize(value)? as u64
            }
            "user_agent" => self.user_agent = value.to_string(),
            "rate_limiter.requests_per_window" => {
                self.rate_limiter_requests_per_window = parse_usize(value)? as u32
            }
            "rate_limiter.window_ms" => self.rate_limiter_window_ms = parse_i64(value)?,
            "rate_limiter.cache_capacity" => {
                self.rate_limiter_cache_capacity = parse_usize(value)?
            }
            "resolver.min_workers" => self.resolver_min_workers = parse_usize(value)?,
            "resolver.max_workers" => self.resolver_max_workers = parse_usize(value)?,
            "log_level" => self.log_level = value.to_string(),
            // Unrecognised keys are ignored, matching the original loader's
            // silent-skip behavior for forward compatibility.
            _ => {}
        }

        Ok(())
    }
}
