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

//! Crate-wide error taxonomy. Storage failures are fatal and propagate as
//! [`Error`]; scheduling conditions (frontier empty, rate limited) are never
//! errors and are represented in-band by their callers instead.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open or grow mmap-backed file at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt on-disk record in {path}")]
    CorruptRecord { path: PathBuf },

    #[error("index out of range: {index} >= {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid config line {line}: {message}")]
    InvalidConfig { line: usize, message: String },

    #[error("no seed URLs configured")]
    NoSeedUrls,

    #[error("could not parse URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
