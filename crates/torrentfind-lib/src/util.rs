use std::future::Future;
use std::time::{Duration, Instant};

/// Size of the piece at `idx`. Only the last piece can be shorter than `piece_size`
pub fn piece_size_from_idx(
    number_of_pieces: usize,
    total_length: usize,
    piece_size: usize,
    idx: u32,
) -> anyhow::Result<usize> {
    let idx = try_into!(idx, usize)?;
    if idx >= number_of_pieces {
        anyhow::bail!("piece index {} is out of bounds: {} pieces in total", idx, number_of_pieces);
    }

    let size = if number_of_pieces - 1 == idx {
        let remainder = total_length % piece_size;
        if remainder == 0 {
            piece_size
        } else {
            remainder
        }
    } else {
        piece_size
    };

    Ok(size)
}

pub trait Elapsed<T> {
    fn with_elapsed(self, name: &'static str, threshold: Option<Duration>) -> impl Future<Output = T> + Send
    where
        Self: Future<Output = T>;
}

impl<F, T> Elapsed<T> for F
where
    F: Future<Output = T> + Send,
{
    async fn with_elapsed(self, name: &'static str, expected: Option<Duration>) -> T
    where
        Self: Future<Output = T>,
    {
        let start = Instant::now();
        let result = self.await;

        let elapsed = start.elapsed();
        match expected {
            Some(expected) if elapsed > expected => {
                tracing::debug!(?expected, ?elapsed, "'{}' took more time than expected", name);
            }
            _ => tracing::trace!("'{}' took {:?}", name, elapsed),
        }

        result
    }
}
