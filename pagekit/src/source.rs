//! Caller-supplied page loading.

use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::Stream;
use pagekit_core::LoadError;
use std::future::Future;

/// One emission of a page load: new content, `None` to unload, or a failure
/// that ends the load for that key.
pub type PageLoad<T> = Result<Option<Vec<T>>, LoadError>;

/// Sequence of emissions for one key. Each `Ok(Some(_))` replaces the page.
pub type PageStream<T> = BoxStream<'static, PageLoad<T>>;

/// Produces the content stream for a key.
///
/// The stream should yield at least one value. It is dropped when the key
/// leaves the window, which cancels whatever it is awaiting. Retries are the
/// source's business; an `Err` is final for that load.
///
/// Implemented for any `Fn(&C, &K) -> impl Stream` closure.
pub trait PageSource<K, T, C>: Send + Sync + 'static {
    fn load(&self, context: &C, key: &K) -> PageStream<T>;
}

impl<K, T, C, F, S> PageSource<K, T, C> for F
where
    F: Fn(&C, &K) -> S + Send + Sync + 'static,
    S: Stream<Item = PageLoad<T>> + Send + 'static,
{
    fn load(&self, context: &C, key: &K) -> PageStream<T> {
        self(context, key).boxed()
    }
}

/// Adapt a one-shot async fetch into a [`PageSource`] yielding a single value.
pub fn single_load<K, T, C, F, Fut>(fetch: F) -> impl PageSource<K, T, C>
where
    K: 'static,
    T: Send + 'static,
    C: 'static,
    F: Fn(&C, &K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PageLoad<T>> + Send + 'static,
{
    move |context: &C, key: &K| stream::once(fetch(context, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_closure_source_streams_every_value() {
        let source = |_: &(), key: &u32| {
            let key = *key;
            stream::iter(vec![Ok(Some(vec![key])), Ok(None), Err(LoadError::new("gone"))])
        };

        let values: Vec<PageLoad<u32>> = source.load(&(), &4).collect().await;
        assert_eq!(
            values,
            vec![Ok(Some(vec![4])), Ok(None), Err(LoadError::new("gone"))]
        );
    }

    #[tokio::test]
    async fn test_single_load_yields_once() {
        let source = single_load(|ctx: &String, key: &usize| {
            let label = format!("{ctx}-{key}");
            async move { Ok(Some(vec![label])) }
        });

        let values: Vec<PageLoad<String>> = source.load(&"q".to_string(), &2).collect().await;
        assert_eq!(values, vec![Ok(Some(vec!["q-2".to_string()]))]);
    }
}
