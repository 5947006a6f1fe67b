// Copyright 2024 Zinc Labs Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Shared retry-with-backoff helper (§7 "Transient object-store and database
//! errors retry with exponential backoff (default: 3 attempts, 1s/2s/4s)").
//! Used by the reader (file listing, file reads) and the bulk loader's
//! wire-level copy path — anywhere this crate talks to the object store or
//! the database directly.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

pub const BACKOFFS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Calls `attempt` up to `BACKOFFS.len() + 1` times, sleeping `BACKOFFS[n]`
/// between attempt `n` and `n+1`. Returns the last error if every attempt
/// fails.
pub async fn with_backoff<T, F, Fut>(op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for (n, backoff) in std::iter::once(None).chain(BACKOFFS.iter().map(Some)).enumerate() {
        if let Some(delay) = backoff {
            tracing::warn!(op, attempt = n, "retrying after backoff");
            tokio::time::sleep(*delay).await;
        }
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::warn!(op, attempt = n, error = %e, "attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Error;

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_try() {
        let calls = AtomicUsize::new(0);
        let result = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7u32) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Aggregation("transient".to_string()))
                } else {
                    Ok(9u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_once_every_attempt_fails() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Aggregation("still failing".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), BACKOFFS.len() + 1);
    }
}
