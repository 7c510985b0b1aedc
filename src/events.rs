use crate::sink::GazeSink;
use crate::types::{Channels, DeviceIdentity, GazeSample};
use crate::{EyeLogicError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::time::Duration;

/// A notification moved off the delivery thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    GazeSample(GazeSample),
    ConnectionClosed,
    DeviceConnected(DeviceIdentity),
    DeviceDisconnected,
    TrackingStopped,
}

/// Create a bounded hand-off between the delivery thread and a consumer.
///
/// The sender side is a [`GazeSink`] to pass to `init`; it never blocks the
/// delivery thread. When the queue is full the newest event is dropped.
pub fn channel(capacity: usize) -> (EventSender, EventStream) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (
        EventSender {
            sender,
            channels: Channels::all(),
        },
        EventStream { receiver },
    )
}

/// Sink that queues every notification.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<Event>,
    channels: Channels,
}

impl EventSender {
    /// Only queue the given channels.
    pub fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = channels;
        self
    }

    fn push(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(Event::GazeSample(sample))) => {
                log::trace!("Event queue full, dropping sample {}", sample.index);
            }
            Err(TrySendError::Full(event)) => {
                log::warn!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("Event stream dropped, discarding event");
            }
        }
    }
}

impl GazeSink for EventSender {
    fn on_gaze_sample(&self, sample: &GazeSample) {
        self.push(Event::GazeSample(*sample));
    }

    fn on_connection_closed(&self) {
        self.push(Event::ConnectionClosed);
    }

    fn on_device_connected(&self, device: &DeviceIdentity) {
        self.push(Event::DeviceConnected(device.clone()));
    }

    fn on_device_disconnected(&self) {
        self.push(Event::DeviceDisconnected);
    }

    fn on_tracking_stopped(&self) {
        self.push(Event::TrackingStopped);
    }

    fn channels(&self) -> Channels {
        self.channels
    }
}

/// Consumer end of [`channel`].
#[derive(Debug)]
pub struct EventStream {
    receiver: Receiver<Event>,
}

impl EventStream {
    /// Receive the next event (blocks until available).
    pub fn recv(&self) -> Result<Event> {
        self.receiver
            .recv()
            .map_err(|_| EyeLogicError::StreamStopped)
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => EyeLogicError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => EyeLogicError::StreamStopped,
        })
    }

    /// Take everything queued right now.
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_newest() {
        let (tx, rx) = channel(1);
        tx.on_device_disconnected();
        tx.on_tracking_stopped();
        assert_eq!(rx.drain(), vec![Event::DeviceDisconnected]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_recv_timeout_and_stop() {
        let (tx, rx) = channel(4);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)),
            Err(EyeLogicError::Timeout)
        ));
        tx.on_connection_closed();
        drop(tx);
        assert_eq!(rx.recv().unwrap(), Event::ConnectionClosed);
        assert!(matches!(rx.recv(), Err(EyeLogicError::StreamStopped)));
    }

    #[test]
    fn test_channel_filter() {
        let (tx, _rx) = channel(4);
        let tx = tx.with_channels(Channels::GAZE_SAMPLE);
        assert_eq!(tx.channels(), Channels::GAZE_SAMPLE);
    }
}
