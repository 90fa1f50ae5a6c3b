//! Boxed user-function shapes shared by the pipeline engines.
//!
//! Stage configuration is deliberately stored as boxed closures behind
//! public setters (or swappable fields) so it can be replaced between
//! iterations; every engine re-reads its closure on each protocol call.
//! Sync closures are wrapped into the async shape at construction, so the
//! engines only ever deal with one calling convention.

use futures::future::BoxFuture;

use crate::error::Result;

/// Async transform: consumes a value, produces another.
pub type AsyncMap<T, U> = Box<dyn FnMut(T) -> BoxFuture<'static, Result<U>> + Send>;

/// Async predicate over a borrowed value.
pub type AsyncPred<T> = Box<dyn for<'a> FnMut(&'a T) -> BoxFuture<'a, Result<bool>> + Send>;

/// Async fold step: accumulator + value in, accumulator out.
pub type AsyncFold<A, T> = Box<dyn FnMut(A, T) -> BoxFuture<'static, Result<A>> + Send>;

/// Wrap an infallible sync transform into the async shape.
pub fn map_fn<T, U, F>(mut f: F) -> AsyncMap<T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    U: Send + 'static,
{
    Box::new(move |v| {
        let out = f(v);
        Box::pin(async move { Ok(out) })
    })
}

/// Wrap a fallible sync transform into the async shape.
pub fn try_map_fn<T, U, F>(mut f: F) -> AsyncMap<T, U>
where
    F: FnMut(T) -> Result<U> + Send + 'static,
    U: Send + 'static,
{
    Box::new(move |v| {
        let out = f(v);
        Box::pin(async move { out })
    })
}

/// Wrap a sync predicate into the async shape.
pub fn pred_fn<T, F>(mut f: F) -> AsyncPred<T>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    Box::new(move |v: &T| {
        let keep = f(v);
        Box::pin(async move { Ok(keep) })
    })
}

/// Wrap a sync fold step into the async shape.
pub fn fold_fn<A, T, F>(mut f: F) -> AsyncFold<A, T>
where
    F: FnMut(A, T) -> A + Send + 'static,
    A: Send + 'static,
{
    Box::new(move |acc, v| {
        let out = f(acc, v);
        Box::pin(async move { Ok(out) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_wrappers_round_trip() {
        let mut m = map_fn(|v: i32| v * 2);
        assert_eq!(m(21).await.unwrap(), 42);

        let mut p = pred_fn(|v: &i32| *v > 0);
        assert!(p(&1).await.unwrap());
        assert!(!p(&-1).await.unwrap());

        let mut f = fold_fn(|acc: i32, v: i32| acc + v);
        assert_eq!(f(40, 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_try_map_propagates_error() {
        let mut m = try_map_fn(|v: i32| {
            if v < 0 {
                Err(crate::error::FlowError::message("negative"))
            } else {
                Ok(v)
            }
        });
        assert!(m(-1).await.is_err());
        assert_eq!(m(7).await.unwrap(), 7);
    }
}
