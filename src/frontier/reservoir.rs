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

//! Reservoir Sampling Algorithm L: draws `k` unique indices uniformly from
//! `[0, n)` without visiting every index.
//! <https://en.wikipedia.org/wiki/Reservoir_sampling#Optimal:_Algorithm_L>

use rand::Rng;

pub fn generate_random_indices<R: Rng + ?Sized>(rng: &mut R, n: usize, k: usize) -> Vec<usize> {
    let mut result: Vec<usize> = (0..k).collect();

    if k == 0 || k >= n {
        result.truncate(n);
        return result;
    }

    let k_f = k as f64;
    let mut w = (rng.gen::<f64>().ln() / k_f).exp();

    let mut i = k;
    while i < n {
        let step = (rng.gen::<f64>().ln() / (1.0 - w).ln()).floor() as i64 + 1;
        i += step as usize;
        if i < n {
            let slot = rng.gen_range(0..k);
            result[slot] = i;
            w *= (rng.gen::<f64>().ln() / k_f).exp();
        }
    }

    result
}
