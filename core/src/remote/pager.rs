//! Cursor pagination with rate-limit aware retry

use super::{Page, PageRequest};
use crate::{Error, Result};
use std::future::Future;

/// Fetch every page of a listing.
///
/// Each page is retried after the server-specified pause when the call is
/// rate limited, at most `max_attempts` times. Running out of attempts fails
/// the whole listing with [`Error::AttemptsExhausted`]; any other error fails
/// it immediately.
pub async fn fetch_all<T, F, Fut>(
    operation: &str,
    page_size: usize,
    max_attempts: u32,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor = String::new();
    let mut page_number = 0usize;

    loop {
        let mut attempt = 0;
        let page = loop {
            if attempt >= max_attempts {
                return Err(Error::AttemptsExhausted {
                    operation: operation.to_string(),
                    attempts: max_attempts,
                });
            }
            tracing::debug!(
                "{}: page {} attempt #{} cursor={:?}",
                operation,
                page_number,
                attempt,
                cursor
            );
            let request = PageRequest {
                cursor: cursor.clone(),
                limit: page_size,
            };
            match fetch(request).await {
                Ok(page) => break page,
                Err(Error::RateLimited { retry_after }) => {
                    tracing::warn!(
                        "{}: hit the workspace API rate limiter, waiting {:?}",
                        operation,
                        retry_after
                    );
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        items.extend(page.items);
        if page.next_cursor.is_empty() {
            break;
        }
        cursor = page.next_cursor;
        page_number += 1;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn rate_limited() -> Error {
        Error::RateLimited {
            retry_after: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_follows_cursors_until_empty() {
        let requests = std::sync::Mutex::new(Vec::new());
        let result = fetch_all("numbers", 2, 3, |req: PageRequest| {
            requests.lock().unwrap().push(req.clone());
            async move {
                Ok(match req.cursor.as_str() {
                    "" => Page { items: vec![1, 2], next_cursor: "a".to_string() },
                    "a" => Page { items: vec![3, 4], next_cursor: "b".to_string() },
                    _ => Page::last(vec![5]),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec![1, 2, 3, 4, 5]);
        let requests = requests.into_inner().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.limit == 2));
        assert_eq!(requests[2].cursor, "b");
    }

    #[tokio::test]
    async fn test_retries_rate_limited_page() {
        let calls = AtomicU32::new(0);
        let result = fetch_all("members", 10, 3, |_req| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited())
                } else {
                    Ok(Page::last(vec!["U1".to_string()]))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec!["U1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<Vec<u8>> = fetch_all("conversations", 10, 3, |_req| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;

        match result {
            Err(Error::AttemptsExhausted { operation, attempts }) => {
                assert_eq!(operation, "conversations");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhausted attempts, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<Vec<u8>> = fetch_all("conversations", 10, 3, |_req| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Remote("invalid_auth".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
