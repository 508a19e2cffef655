use std::sync::mpsc::Sender;
use std::time::Duration;

use kvbc::stream::StreamSink;

/// Sink backed by a channel. Dropping the receiver plays the role of the
/// client disconnecting: the next write returns `false`.
pub(crate) struct ChannelSink<T> {
    sender: Sender<T>,
    /// Artificial per-write latency, to let live pushes outrun a slow
    /// subscriber in ring-overflow tests.
    delay: Duration,
}

#[allow(dead_code)]
impl<T> ChannelSink<T> {
    pub(crate) fn new(sender: Sender<T>) -> ChannelSink<T> {
        ChannelSink {
            sender,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn slow(sender: Sender<T>, delay: Duration) -> ChannelSink<T> {
        ChannelSink { sender, delay }
    }
}

impl<T> StreamSink<T> for ChannelSink<T> {
    fn write(&mut self, item: T) -> bool {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.sender.send(item).is_ok()
    }
}
