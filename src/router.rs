//! Subject id → bucket routing.
//!
//! Routing is a pure function of the subject id and the bucket count: an Adler-32 of
//! the id's little-endian bytes, reduced modulo the bucket count. Writers and readers must
//! route with the same function and the same count; changing the count of an existing
//! dataset sends subjects to different buckets and invalidates it.

use crate::error::{Error, Result};

/// Bucket index for `subject_id` among `num_buckets` buckets.
///
/// # Panics
/// Panics if `num_buckets` is zero. Use [`Router`] for a validated count.
#[must_use]
pub fn bucket_for(subject_id: u64, num_buckets: u32) -> u32 {
    assert!(num_buckets > 0, "bucket count must be positive");
    adler2::adler32_slice(&subject_id.to_le_bytes()) % num_buckets
}

/// Router over a fixed, non-zero bucket count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Router {
    num_buckets: u32,
}

impl Router {
    /// # Errors
    /// Returns [`Error::Config`] for a zero bucket count.
    pub fn new(num_buckets: u32) -> Result<Self> {
        if num_buckets == 0 {
            return Err(Error::config("bucket count must be positive"));
        }
        Ok(Self { num_buckets })
    }

    #[must_use]
    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    #[inline]
    #[must_use]
    pub fn route(&self, subject_id: u64) -> u32 {
        adler2::adler32_slice(&subject_id.to_le_bytes()) % self.num_buckets
    }
}
