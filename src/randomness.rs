//! Random helpers shared by the factory, mutation and local search
//!
//! Every operator takes a caller-supplied `Rng`, so a run is reproducible from
//! its seed. The canonical generator is `ChaCha8Rng`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic generator for a seed.
pub fn seeded(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// `true` with probability `p`.
pub fn chance<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    if p <= 0.0 {
        return false;
    }
    rng.gen::<f64>() <= p
}

pub fn choice<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.gen_range(0..items.len())])
    }
}

/// Standard normal sample (Box-Muller).
pub fn next_gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = loop {
        let u: f64 = rng.gen();
        if u > f64::EPSILON {
            break u;
        }
    };
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// A printable ASCII character.
pub fn next_char<R: Rng + ?Sized>(rng: &mut R) -> char {
    char::from(rng.gen_range(32u8..127u8))
}

pub fn next_string<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length).map(|_| next_char(rng)).collect()
}

/// Uniform integer in `[-bound, bound]`.
pub fn next_bounded_int<R: Rng + ?Sized>(rng: &mut R, bound: i64) -> i64 {
    let bound = bound.max(0);
    rng.gen_range(-bound..=bound)
}
