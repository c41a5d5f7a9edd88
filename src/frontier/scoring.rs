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

//! Priority score computed once at push time. Higher is more urgent.
//! Mirrors the original crawler's `URLScorer` concept: any type exposing a
//! `score(url) -> u32` function can stand in for it.

const BASE_SCORE: u32 = 1_000;
const HTTPS_BONUS: u32 = 50;
const TLD_BONUS: u32 = 100;
const DOMAIN_WHITELIST_BONUS: u32 = 200;

const DOMAIN_LENGTH_THRESHOLD: usize = 30;
const DOMAIN_LENGTH_PENALTY_PER_CHAR: u32 = 2;

const URL_LENGTH_THRESHOLD: usize = 100;
const URL_LENGTH_PENALTY_PER_CHAR: u32 = 1;

const QUERY_PARAM_THRESHOLD: usize = 3;
const QUERY_PARAM_PENALTY: u32 = 20;

const PATH_DEPTH_THRESHOLD: usize = 5;
const PATH_DEPTH_PENALTY: u32 = 15;

const TLD_WHITELIST: &[&str] = &["com", "org", "net", "edu", "gov"];

pub trait UrlScorer {
    fn score(url: &str) -> u32;
}

/// Scores URLs using structural heuristics only (no fetched content).
pub struct DefaultScorer;

fn saturating_penalty(total: u32, penalty: u32) -> u32 {
    total.saturating_sub(penalty)
}

impl UrlScorer for DefaultScorer {
    fn score(url: &str) -> u32 {
        let mut score = BASE_SCORE;

        let parsed = match url::Url::parse(url) {
            Ok(u) => u,
            Err(_) => return score,
        };

        if parsed.scheme() == "https" {
            score += HTTPS_BONUS;
        }

        let host = parsed.host_str().unwrap_or_default();
        if let Some(tld) = host.rsplit('.').next() {
            if TLD_WHITELIST.contains(&tld) {
                score += TLD_BONUS;
            }
        }
        if is_whitelisted_domain(host) {
            score += DOMAIN_WHITELIST_BONUS;
        }

        if host.len() > DOMAIN_LENGTH_THRESHOLD {
            let over = (host.len() - DOMAIN_LENGTH_THRESHOLD) as u32;
            score = saturating_penalty(score, over * DOMAIN_LENGTH_PENALTY_PER_CHAR);
        }

        if url.len() > URL_LENGTH_THRESHOLD {
            let over = (url.len() - URL_LENGTH_THRESHOLD) as u32;
            score = saturating_penalty(score, over * URL_LENGTH_PENALTY_PER_CHAR);
        }

        let query_params = parsed.query_pairs().count();
        if query_params > QUERY_PARAM_THRESHOLD {
            let over = (query_params - QUERY_PARAM_THRESHOLD) as u32;
            score = saturating_penalty(score, over * QUERY_PARAM_PENALTY);
        }

        let path_depth = parsed
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).count())
            .unwrap_or(0);
        if path_depth > PATH_DEPTH_THRESHOLD {
            let over = (path_depth - PATH_DEPTH_THRESHOLD) as u32;
            score = saturating_penalty(score, over * PATH_DEPTH_PENALTY);
        }

        score
    }
}

fn is_whitelisted_domain(_host: &str) -> bool {
    // No domain whitelist is configured by default; left as an extension
    // point for callers that want to bias known-good seed domains.
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_scores_higher_than_http() {
        let https = DefaultScorer::score("https://example.com/");
        let http = DefaultScorer::score("http://example.com/");
        assert!(https > http);
    }

    #[test]
    fn long_url_is_penalized() {
        let short = DefaultScorer::score("https://example.com/a");
        let long_path = format!("https://example.com/{}", "a".repeat(200));
        let long = DefaultScorer::score(&long_path);
        assert!(long < short);
    }

    #[test]
    fn many_query_params_are_penalized() {
        let few = DefaultScorer::score("https://example.com/?a=1");
        let many = DefaultScorer::score("https://example.com/?a=1&b=2&c=3&d=4&e=5&f=6");
        assert!(many < few);
    }

    #[test]
    fn deep_paths_are_penalized() {
        let shallow = DefaultScorer::score("https://example.com/a/b");
        let deep = DefaultScorer::score("https://example.com/a/b/c/d/e/f/g/h");
        assert!(deep < shallow);
    }

    #[test]
    fn score_never_underflows() {
        let pathological = format!(
            "https://{}.example.com/{}?{}",
            "x".repeat(500),
            "y".repeat(500),
            (0..50).map(|i| format!("p{i}=1")).collect::<Vec<_>>().join("&")
        );
        // Should not panic and should saturate at 0 rather than wrap.
        let score = DefaultScorer::score(&pathological);
        assert!(score < BASE_SCORE);
    }
}
