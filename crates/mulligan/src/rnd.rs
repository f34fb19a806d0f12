// Copyright (c) Microsoft Corporation.

use std::fmt::Debug;

/// Non-cryptographic random number generator used in this crate.
///
/// Randomness here only spreads out retry delays (jitter, uniform backoff);
/// nothing security-critical depends on it, so a lightweight generator is
/// enough. The test variant replaces the generator with a deterministic
/// function so delay computations can be asserted exactly.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    #[cfg(test)]
    Test(std::sync::Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(std::sync::Arc::new(move || value))
    }

    /// Returns a value in `[0.0, 1.0)`.
    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }

    /// Returns a value in `[0, bound)`, or 0 when `bound` is 0.
    pub fn below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }

        let sample = self.next_f64() * bound as f64;
        (sample as u64).min(bound - 1)
    }
}
