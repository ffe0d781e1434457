//! Batch retry with halving.
//!
//! When a whole-batch operation fails, the batch is split in half and each
//! half retried, recursing to a bounded depth; at the leaves every item is
//! isolated individually, so a single poison record costs one failure
//! instead of the batch.

use futures::future::BoxFuture;

/// Merged results of the successful sub-batches plus the isolated failures
#[derive(Debug)]
pub struct HalvingOutcome<R> {
    pub result: R,
    /// Absolute item index and error text per isolated failure
    pub failures: Vec<(usize, String)>,
}

impl<R> HalvingOutcome<R> {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Run `op` over `items`, bisecting on failure.
///
/// `op` receives owned chunks so sub-batches can be retried freely;
/// `merge` folds each successful sub-batch result into the accumulator.
pub async fn retry_with_halving<'op, T, R, F, M>(
    items: &[T],
    max_depth: u32,
    op: &'op F,
    merge: &M,
) -> HalvingOutcome<R>
where
    T: Clone + Send + Sync,
    R: Default + Send,
    F: Fn(Vec<T>) -> BoxFuture<'op, anyhow::Result<R>> + Sync,
    M: Fn(&mut R, R) + Sync,
{
    let mut outcome = HalvingOutcome {
        result: R::default(),
        failures: Vec::new(),
    };
    halve(items, 0, 0, max_depth, op, merge, &mut outcome).await;
    outcome
}

fn halve<'op, 'pass, T, R, F, M>(
    items: &'pass [T],
    offset: usize,
    depth: u32,
    max_depth: u32,
    op: &'op F,
    merge: &'pass M,
    outcome: &'pass mut HalvingOutcome<R>,
) -> BoxFuture<'pass, ()>
where
    'op: 'pass,
    T: Clone + Send + Sync,
    R: Default + Send,
    F: Fn(Vec<T>) -> BoxFuture<'op, anyhow::Result<R>> + Sync,
    M: Fn(&mut R, R) + Sync,
{
    Box::pin(async move {
        if items.is_empty() {
            return;
        }

        match op(items.to_vec()).await {
            Ok(result) => merge(&mut outcome.result, result),
            Err(_) if items.len() > 1 && depth < max_depth => {
                let mid = items.len() / 2;
                halve(&items[..mid], offset, depth + 1, max_depth, op, merge, outcome).await;
                halve(&items[mid..], offset + mid, depth + 1, max_depth, op, merge, outcome).await;
            }
            Err(e) if items.len() == 1 => {
                outcome.failures.push((offset, format!("{e:#}")));
            }
            Err(_) => {
                // Depth exhausted on a multi-item slice: isolate per item
                for (i, item) in items.iter().enumerate() {
                    match op(vec![item.clone()]).await {
                        Ok(result) => merge(&mut outcome.result, result),
                        Err(e) => outcome.failures.push((offset + i, format!("{e:#}"))),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    /// Sums chunks, refusing any chunk containing a poison value
    async fn sum_chunk(chunk: Vec<i32>) -> anyhow::Result<i64> {
        if chunk.iter().any(|&v| v < 0) {
            anyhow::bail!("poison value in chunk");
        }
        Ok(chunk.iter().map(|&v| i64::from(v)).sum())
    }

    #[tokio::test]
    async fn healthy_batch_runs_once() {
        let items = vec![1, 2, 3, 4];
        let outcome = retry_with_halving(
            &items,
            4,
            &|chunk| sum_chunk(chunk).boxed(),
            &|acc: &mut i64, r| *acc += r,
        )
        .await;

        assert_eq!(outcome.result, 10);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn single_poison_item_is_isolated() {
        let items = vec![1, 2, -7, 4, 5, 6, 7, 8];
        let outcome = retry_with_halving(
            &items,
            4,
            &|chunk| sum_chunk(chunk).boxed(),
            &|acc: &mut i64, r| *acc += r,
        )
        .await;

        assert_eq!(outcome.result, 1 + 2 + 4 + 5 + 6 + 7 + 8);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(outcome.failures[0].0, 2, "absolute index of the poison item");
    }

    #[tokio::test]
    async fn depth_bound_falls_back_to_per_item_isolation() {
        let items = vec![-1, 2, -3, 4];
        let outcome = retry_with_halving(
            &items,
            0,
            &|chunk| sum_chunk(chunk).boxed(),
            &|acc: &mut i64, r| *acc += r,
        )
        .await;

        assert_eq!(outcome.result, 6);
        let failed: Vec<usize> = outcome.failures.iter().map(|(i, _)| *i).collect();
        assert_eq!(failed, vec![0, 2]);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let items: Vec<i32> = Vec::new();
        let outcome = retry_with_halving(
            &items,
            4,
            &|chunk| sum_chunk(chunk).boxed(),
            &|acc: &mut i64, r| *acc += r,
        )
        .await;
        assert_eq!(outcome.result, 0);
        assert!(outcome.failures.is_empty());
    }
}
