use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("batch size must be at least 1")]
pub struct BatchSizeError;

/// Group a fallible stream into contiguous chunks of `size` items.
///
/// The final chunk may be shorter. An upstream error discards the partially
/// filled chunk, is yielded once, and ends the stream.
pub fn batch<S, T, E>(
    items: S,
    size: usize,
) -> Result<impl Stream<Item = Result<Vec<T>, E>>, BatchSizeError>
where
    S: Stream<Item = Result<T, E>>,
{
    if size == 0 {
        return Err(BatchSizeError);
    }

    Ok(stream::unfold(Some(Box::pin(items)), move |upstream| async move {
        let mut upstream = upstream?;
        let mut chunk = Vec::with_capacity(size);
        let mut exhausted = false;
        while chunk.len() < size {
            match upstream.next().await {
                Some(Ok(item)) => chunk.push(item),
                Some(Err(err)) => return Some((Err(err), None)),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        if chunk.is_empty() {
            return None;
        }
        let rest = if exhausted { None } else { Some(upstream) };
        Some((Ok(chunk), rest))
    }))
}
