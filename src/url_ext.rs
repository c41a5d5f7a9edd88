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

//! URL canonicalization. The core treats canonicalization as an external
//! collaborator's job (link extraction / normalization policy lives
//! upstream), but the middle queue and the demo coordinator both need a
//! concrete `host()`/`canonicalize()` to group URLs, so a small `url`-crate
//! based implementation lives here.

use url::Url;

/// Lowercases the host, strips the default port for the scheme, and drops
/// the fragment. Returns `None` if `url` does not parse as an absolute URL.
pub fn canonicalize(input: &str) -> Option<String> {
    let mut parsed = Url::parse(input).ok()?;
    parsed.set_fragment(None);

    if let Some(port) = parsed.port() {
        if parsed.port_or_known_default() == Some(port) && is_default_port(parsed.scheme(), port)
        {
            let _ = parsed.set_port(None);
        }
    }

    Some(parsed.as_str().to_string())
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Extracts the canonical host string a URL belongs to, for grouping in the
/// middle queue. Returns `None` if `url` does not parse or has no host.
pub fn host(input: &str) -> Option<String> {
    Url::parse(input)
        .ok()?
        .host_str()
        .map(|h| h.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_host() {
        let canon = canonicalize("https://Example.COM/Path").unwrap();
        assert!(canon.starts_with("https://example.com/"));
    }

    #[test]
    fn strips_default_https_port() {
        let canon = canonicalize("https://example.com:443/path").unwrap();
        assert_eq!(canon, "https://example.com/path");
    }

    #[test]
    fn keeps_non_default_port() {
        let canon = canonicalize("https://example.com:8443/path").unwrap();
        assert_eq!(canon, "https://example.com:8443/path");
    }

    #[test]
    fn strips_fragment() {
        let canon = canonicalize("https://example.com/path#section").unwrap();
        assert_eq!(canon, "https://example.com/path");
    }

    #[test]
    fn host_extracts_lowercased_host() {
        assert_eq!(
            host("https://Example.com/page").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn invalid_url_returns_none() {
        assert_eq!(canonicalize("not a url"), None);
        assert_eq!(host("not a url"), None);
    }
}
