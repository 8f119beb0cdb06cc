use std::future::Future;
use std::sync::Arc;

/// Runs the group half of a chord (§5, §9): spawns one task per item,
/// collects results in input order. A worker that panics reports `None`
/// instead of propagating — the donor never models this pattern (it has no
/// broker), so this realization is sourced from `tokio::spawn`'s own
/// `JoinHandle` contract plus the group/callback wording in §4.10/§5.
///
/// The caller invokes its own callback on the returned `Vec<Option<O>>`; the
/// broker itself only guarantees the callback-equivalent step runs after
/// every group member has reported, exactly once.
pub async fn group<I, O, W, WFut>(items: Vec<I>, worker: W) -> Vec<Option<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    W: Fn(I) -> WFut + Send + Sync + 'static,
    WFut: Future<Output = O> + Send + 'static,
{
    let worker = Arc::new(worker);
    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let worker = Arc::clone(&worker);
        handles.push(tokio::spawn(async move { worker(item).await }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.ok());
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_preserves_order_and_survives_panics() {
        let items = vec![1, 2, 3, 4];
        let results = group(items, |n| async move {
            if n == 3 {
                panic!("boom");
            }
            n * 10
        })
        .await;

        assert_eq!(results, vec![Some(10), Some(20), None, Some(40)]);
    }
}
