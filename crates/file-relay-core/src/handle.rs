use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Handle;

pub const DEFAULT_HANDLE_LENGTH: usize = 16;

/// Source of candidate handles.
///
/// A source does not check uniqueness. Callers test each candidate against the index
/// and ask for another one on collision.
pub trait HandleSource: Send {
    fn next_handle(&mut self) -> Handle;
}

/// Fixed-length digit strings drawn uniformly from `R`.
#[derive(Debug, Clone)]
pub struct RandomHandleSource<R = StdRng> {
    rng: R,
    length: usize,
}

impl RandomHandleSource<StdRng> {
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self::with_rng(StdRng::from_entropy(), length)
    }
}

impl Default for RandomHandleSource<StdRng> {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLE_LENGTH)
    }
}

impl<R> RandomHandleSource<R>
where
    R: Rng,
{
    /// A length of zero is raised to one so every candidate parses as a `Handle`.
    /// `RelayConfig::validate` in the api crate rejects zero before it gets here.
    #[must_use]
    pub fn with_rng(rng: R, length: usize) -> Self {
        Self { rng, length: length.max(1) }
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }
}

impl<R> HandleSource for RandomHandleSource<R>
where
    R: Rng + Send,
{
    fn next_handle(&mut self) -> Handle {
        let digits = (0..self.length)
            .map(|_| char::from(b'0' + self.rng.gen_range(0..10_u8)))
            .collect::<String>();
        Handle::from_digits(digits)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn default_handles_are_sixteen_digits() {
        let mut source = RandomHandleSource::default();
        for _ in 0..100 {
            let handle = source.next_handle();
            assert_eq!(handle.as_str().len(), DEFAULT_HANDLE_LENGTH);
            assert!(handle.as_str().bytes().all(|byte| byte.is_ascii_digit()));
            assert!(Handle::parse(handle.as_str()).is_ok());
        }
    }

    #[test]
    fn seeded_source_is_reproducible() {
        let mut a = RandomHandleSource::with_rng(StdRng::seed_from_u64(7), 12);
        let mut b = RandomHandleSource::with_rng(StdRng::seed_from_u64(7), 12);
        for _ in 0..10 {
            assert_eq!(a.next_handle(), b.next_handle());
        }
    }

    #[test]
    fn every_digit_shows_up_and_leading_zeros_are_kept() {
        let mut source = RandomHandleSource::with_rng(StdRng::seed_from_u64(99), 16);
        let mut seen = HashSet::new();
        let mut leading_zero = false;
        for _ in 0..500 {
            let handle = source.next_handle();
            leading_zero |= handle.as_str().starts_with('0');
            seen.extend(handle.as_str().chars());
        }
        assert_eq!(seen.len(), 10);
        assert!(leading_zero);
    }

    #[test]
    fn zero_length_is_clamped() {
        let mut source = RandomHandleSource::with_rng(StdRng::seed_from_u64(1), 0);
        assert_eq!(source.length(), 1);
        assert_eq!(source.next_handle().as_str().len(), 1);
    }
}
