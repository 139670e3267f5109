//! Batch-at-a-time pulling from a native object enumerator.

use std::collections::VecDeque;

use crate::error::AccessError;

/// What one call to the native enumerator produced.
///
/// A call may hand back some ids and still fail; those ids are yielded before the failure.
pub(crate) struct Batch {
    pub ids: Vec<String>,
    pub failure: Option<AccessError>,
}

enum State {
    More,
    Done,
    Failed(AccessError),
}

/// Ids pulled `batch_size` at a time.
///
/// A short batch ends the listing. A failed fetch ends it with one terminal `Err` after the
/// ids already received, so a broken enumeration never looks like a short directory.
pub(crate) struct BatchedIds<F> {
    fetch: F,
    batch_size: usize,
    pending: VecDeque<String>,
    state: State,
}

impl<F> BatchedIds<F>
where
    F: FnMut(usize) -> Batch,
{
    pub fn new(batch_size: usize, fetch: F) -> Self {
        Self {
            fetch,
            batch_size,
            pending: VecDeque::new(),
            state: State::More,
        }
    }

    fn fill(&mut self) {
        let Batch { ids, failure } = (self.fetch)(self.batch_size);
        let short = ids.len() < self.batch_size;
        self.pending.extend(ids);
        self.state = match failure {
            Some(e) => State::Failed(e),
            None if short => State::Done,
            None => State::More,
        };
    }
}

impl<F> Iterator for BatchedIds<F>
where
    F: FnMut(usize) -> Batch,
{
    type Item = Result<String, AccessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && matches!(self.state, State::More) {
            self.fill();
        }
        if let Some(id) = self.pending.pop_front() {
            return Some(Ok(id));
        }
        match std::mem::replace(&mut self.state, State::Done) {
            State::Failed(e) => Some(Err(e)),
            State::More | State::Done => None,
        }
    }
}

impl<F> std::iter::FusedIterator for BatchedIds<F> where F: FnMut(usize) -> Batch {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("o{i}")).collect()
    }

    #[test]
    fn test_short_batch_ends_the_listing() {
        let mut calls = 0;
        let listing = BatchedIds::new(3, |n| {
            calls += 1;
            let start = (calls - 1) * n;
            Batch {
                ids: ids(start..(start + n).min(7)),
                failure: None,
            }
        });

        let all: Vec<String> = listing.map(Result::unwrap).collect();
        assert_eq!(all, ids(0..7));
    }

    #[test]
    fn test_full_batch_then_empty_batch_ends_cleanly() {
        let mut batches = vec![ids(0..2), Vec::new()].into_iter();
        let listing = BatchedIds::new(2, |_| Batch {
            ids: batches.next().unwrap_or_default(),
            failure: None,
        });

        assert_eq!(listing.map(Result::unwrap).count(), 2);
    }

    #[test]
    fn test_failure_after_some_batches_is_terminal_err() {
        let mut calls = 0;
        let mut listing = BatchedIds::new(2, |_| {
            calls += 1;
            match calls {
                1 => Batch { ids: ids(0..2), failure: None },
                _ => Batch {
                    ids: ids(2..3),
                    failure: Some(AccessError::backend("enumerate DEVICE: device gone")),
                },
            }
        });

        let ok: Vec<String> = listing.by_ref().take(3).map(Result::unwrap).collect();
        assert_eq!(ok, ids(0..3));
        let err = listing.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("device gone"), "{err}");
        assert!(listing.next().is_none());
    }

    #[test]
    fn test_failure_on_first_fetch_is_not_an_empty_listing() {
        let mut listing = BatchedIds::new(100, |_| Batch {
            ids: Vec::new(),
            failure: Some(AccessError::backend("enumerate s1: E_FAIL")),
        });

        assert!(listing.next().unwrap().is_err());
        assert!(listing.next().is_none());
    }
}
