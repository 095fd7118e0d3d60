//! Candidate negotiation for listener ports and socket paths.
//!
//! A transport describes an inclusive range of candidates and a factory that
//! attempts to bind one candidate. Candidates are tried one at a time, in the
//! range's direction, until a bind succeeds or the range is exhausted.

use std::future::Future;
use std::io;

use crate::error::{EngineError, EngineResult};
use crate::logging::Logger;

/// Inclusive candidate range, walked ascending if `start <= end`, else
/// descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRange {
    /// First candidate tried.
    pub start: u16,
    /// Last candidate tried.
    pub end: u16,
}

impl CandidateRange {
    /// Create a range.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of candidates in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.start.abs_diff(self.end)) + 1
    }

    /// Always `false`: a range holds at least one candidate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Candidates in trial order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = u16> + Send> {
        if self.start <= self.end {
            Box::new(self.start..=self.end)
        } else {
            Box::new((self.end..=self.start).rev())
        }
    }
}

/// Try every candidate of `range` with `bind` until one succeeds.
///
/// Each attempt is awaited before the next one starts. A failed attempt is
/// logged on the debug channel and counts as "busy".
///
/// # Errors
///
/// [`EngineError::Exhausted`] when no candidate could be bound.
pub async fn negotiate<T, F, Fut>(
    range: CandidateRange,
    mut bind: F,
    logger: &Logger,
) -> EngineResult<(u16, T)>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    for candidate in range.iter() {
        match bind(candidate).await {
            Ok(bound) => {
                logger.debug(format_args!("Bound candidate {candidate}"));
                return Ok((candidate, bound));
            }
            Err(e) => {
                logger.debug(format_args!("Candidate {candidate} busy: {e}"));
            }
        }
    }
    Err(EngineError::Exhausted {
        start: range.start,
        end: range.end,
    })
}
