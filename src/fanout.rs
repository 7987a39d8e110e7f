//! Bounded concurrent fan-out
//!
//! Runs one future per item with at most `limit` in flight and yields each
//! item's outcome as soon as it completes. Failures stay attached to their item
//! and never cancel siblings; the caller decides what to do per item.

use futures::stream::{self, Stream, StreamExt};
use std::future::Future;

/// Worker count used for resource group enumeration
pub const DEFAULT_FAN_OUT_LIMIT: usize = 5;

/// Outcome of one fanned-out item
#[derive(Debug)]
pub struct FanOutResult<I, T> {
    pub item: I,
    pub result: anyhow::Result<T>,
}

/// Map `items` through `f`, at most `limit` at a time, in completion order
pub fn fan_out<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    limit: usize,
    f: F,
) -> impl Stream<Item = FanOutResult<I, T>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    stream::iter(items)
        .map(move |item| {
            let fut = f(item.clone());
            async move {
                FanOutResult {
                    item,
                    result: fut.await,
                }
            }
        })
        .buffer_unordered(limit.max(1))
}
