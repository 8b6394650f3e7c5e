//! The pull-based [`SignalSource`] interface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use toybridge_types::Sample;

/// A non-blocking source of signal samples.
///
/// `try_receive` is polled once per bridge tick.  When it returns a sample,
/// that sample is the next one in arrival order; `None` means nothing is
/// waiting right now.
pub trait SignalSource {
    fn try_receive(&mut self) -> Option<Sample>;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn try_receive(&mut self) -> Option<Sample> {
        (**self).try_receive()
    }
}

type Queue = Arc<Mutex<VecDeque<Sample>>>;

fn lock(queue: &Queue) -> MutexGuard<'_, VecDeque<Sample>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory FIFO source.
///
/// Feed it through the [`QueueSender`] handle returned by
/// [`QueueSource::new`]; senders can be cloned and moved to other threads.
#[derive(Default)]
pub struct QueueSource {
    queue: Queue,
}

/// Producer side of a [`QueueSource`].
#[derive(Clone)]
pub struct QueueSender {
    queue: Queue,
}

impl QueueSource {
    pub fn new() -> (Self, QueueSender) {
        let source = Self::default();
        let sender = QueueSender {
            queue: Arc::clone(&source.queue),
        };
        (source, sender)
    }

    /// Build a source pre-loaded with `samples`.
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(samples.into_iter().collect())),
        }
    }

    /// Number of samples still waiting.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl QueueSender {
    pub fn send(&self, sample: Sample) {
        lock(&self.queue).push_back(sample);
    }
}

impl SignalSource for QueueSource {
    fn try_receive(&mut self) -> Option<Sample> {
        lock(&self.queue).pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_arrival_order() {
        let (mut source, sender) = QueueSource::new();
        sender.send(Sample::float("/a", 0.1));
        sender.send(Sample::contact("/b", true));

        assert_eq!(source.pending(), 2);
        assert_eq!(source.try_receive().unwrap().address, "/a");
        assert_eq!(source.try_receive().unwrap().address, "/b");
        assert!(source.try_receive().is_none());
    }

    #[test]
    fn sender_works_across_threads() {
        let (mut source, sender) = QueueSource::new();
        std::thread::spawn(move || sender.send(Sample::float("/x", 1.0)))
            .join()
            .unwrap();
        assert_eq!(source.try_receive(), Some(Sample::float("/x", 1.0)));
    }

    #[test]
    fn boxed_sources_delegate() {
        let mut source: Box<dyn SignalSource> =
            Box::new(QueueSource::from_samples([Sample::float("/y", 0.5)]));
        assert!(source.try_receive().is_some());
        assert!(source.try_receive().is_none());
    }
}
