//! Pacing for step replay. Steps of a finished run are revealed one at a
//! time so the reader sees the reasoning unfold instead of a single jump.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use rand::Rng;

/// Source of the pause that follows each replayed item.
pub trait Pacer: Send + Sync {
    fn next_delay(&self) -> Duration;
}

/// Uniform random pause in `[min, max)`.
#[derive(Clone, Debug)]
pub struct RandomPacer {
    min: Duration,
    max: Duration,
}

impl RandomPacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_millis(min: u64, max: u64) -> Self {
        Self::new(Duration::from_millis(min), Duration::from_millis(max))
    }
}

impl Default for RandomPacer {
    fn default() -> Self {
        Self::from_millis(1000, 2000)
    }
}

impl Pacer for RandomPacer {
    fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..self.max)
    }
}

/// No pause at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl Pacer for NoDelay {
    fn next_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Yield `items` in order, sleeping for one pacer delay after each item
/// (the last included) before the next poll completes.
pub fn paced<T>(items: Vec<T>, pacer: Arc<dyn Pacer>) -> impl Stream<Item = T> + Send
where
    T: Send + 'static,
{
    let state = (VecDeque::from(items), pacer, false);
    futures::stream::unfold(state, |(mut queue, pacer, yielded)| async move {
        if yielded {
            let delay = pacer.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let item = queue.pop_front()?;
        Some((item, (queue, pacer, true)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Instant;

    struct Fixed(Duration);

    impl Pacer for Fixed {
        fn next_delay(&self) -> Duration {
            self.0
        }
    }

    #[test]
    fn random_delay_in_range() {
        let pacer = RandomPacer::default();
        for _ in 0..200 {
            let d = pacer.next_delay();
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(2000));
        }
    }

    #[test]
    fn degenerate_window_uses_min() {
        let pacer = RandomPacer::from_millis(50, 50);
        assert_eq!(pacer.next_delay(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn pauses_after_every_item() {
        tokio::time::pause();
        let start = Instant::now();
        let mut stream = Box::pin(paced(vec![1, 2, 3], Arc::new(Fixed(Duration::from_secs(1)))));

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(stream.next().await, Some(2));
        let after_two = start.elapsed();
        assert!(after_two >= Duration::from_secs(1) && after_two < Duration::from_secs(2));
        assert_eq!(stream.next().await, Some(3));
        assert_eq!(stream.next().await, None);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn no_delay_is_immediate() {
        tokio::time::pause();
        let start = Instant::now();
        let items: Vec<_> = paced(vec!["a", "b"], Arc::new(NoDelay)).collect().await;
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn empty_input_does_not_wait() {
        tokio::time::pause();
        let start = Instant::now();
        let items: Vec<u8> = paced::<u8>(vec![], Arc::new(Fixed(Duration::from_secs(5)))).collect().await;
        assert!(items.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
