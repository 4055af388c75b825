//! Latest-value stream combinators.
//!
//! The evaluator models continuous computation as push-based streams.
//! Binary operators join their operands with latest-value semantics: a new
//! combined value is produced on every update from either side, using the
//! most recent value of the other side. A completed upstream keeps
//! contributing its final value.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use warden_core::Val;

/// A live sequence of evaluation results.
pub type ValStream = BoxStream<'static, Val>;

enum Side<T> {
    Left(T),
    Right(T),
}

/// Join two streams with latest-value semantics.
///
/// Emits `combine(latest_left, latest_right)` on every upstream emission
/// once both sides have produced at least one value.
pub fn combine_latest<T, F>(
    left: BoxStream<'static, T>,
    right: BoxStream<'static, T>,
    combine: F,
) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
    F: Fn(&T, &T) -> T + Send + 'static,
{
    let tagged = stream::select(left.map(Side::Left), right.map(Side::Right));
    tagged
        .scan((None, None), move |(latest_left, latest_right), item| {
            match item {
                Side::Left(value) => *latest_left = Some(value),
                Side::Right(value) => *latest_right = Some(value),
            }
            let combined = match (latest_left.as_ref(), latest_right.as_ref()) {
                (Some(l), Some(r)) => Some(combine(l, r)),
                _ => None,
            };
            future::ready(Some(combined))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Join any number of streams with latest-value semantics.
///
/// Emits the vector of latest values on every upstream emission once every
/// stream has produced at least one value. An empty input immediately
/// yields one empty vector.
pub fn combine_latest_all<T>(streams: Vec<BoxStream<'static, T>>) -> BoxStream<'static, Vec<T>>
where
    T: Clone + Send + 'static,
{
    if streams.is_empty() {
        return stream::once(future::ready(Vec::new())).boxed();
    }
    let count = streams.len();
    let tagged = stream::select_all(
        streams
            .into_iter()
            .enumerate()
            .map(|(index, s)| s.map(move |value| (index, value)).boxed()),
    );
    tagged
        .scan(vec![None; count], move |latest, (index, value)| {
            latest[index] = Some(value);
            let combined = if latest.iter().all(Option::is_some) {
                Some(latest.iter().map(|v| v.clone().unwrap()).collect::<Vec<T>>())
            } else {
                None
            };
            future::ready(Some(combined))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Suppress consecutive duplicate values.
pub fn distinct_until_changed<T>(input: BoxStream<'static, T>) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + 'static,
{
    input
        .scan(None, |last: &mut Option<T>, value| {
            let changed = last.as_ref() != Some(&value);
            *last = Some(value.clone());
            future::ready(Some(changed.then_some(value)))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Stream of a single immediate value.
#[must_use]
pub fn once_val(value: Val) -> ValStream {
    stream::once(future::ready(value)).boxed()
}
