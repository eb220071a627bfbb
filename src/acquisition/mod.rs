//! # Acquisition Module
//!
//! Background loop that turns serial lines into samples.
//!
//! This module handles:
//! - Owning the serial link for the lifetime of one session
//! - Reading lines with a short timeout and decoding them
//! - Forwarding samples over an unbounded channel (the sender never blocks)
//! - Cooperative cancellation and a single terminal event per session
//!
//! ## Lifecycle
//!
//! `Created` → [`AcquisitionTask::start`] → `Running` → (cancel) `Stopping` →
//! `Stopped`. A device failure or end of stream goes straight from `Running`
//! to `Stopped`. Nothing is retried: reconnecting is the caller's decision.

pub mod controller;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::record::{decoder, Sample};
use crate::serial::port_trait::SerialPortIO;
use crate::serial::SerialLink;

pub use controller::AcquisitionController;

/// Lifecycle state of an acquisition task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    /// Cancellation requested, loop not yet exited
    Stopping,
    Stopped,
}

/// Why a session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `cancel()` was called
    Cancelled,
    /// The link was no longer open
    DeviceClosed,
    /// The receiving side of the channel was dropped
    ConsumerGone,
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub lines_read: u64,
    pub samples: u64,
    pub malformed: u64,
}

/// Final report of a session that ended cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub stats: SessionStats,
}

/// Message from the acquisition task to its consumer
///
/// Every session produces zero or more `Sample`s followed by exactly one
/// `Ended`, in that order.
#[derive(Debug)]
pub enum AcquisitionEvent {
    Sample(Sample),
    Ended(Result<SessionSummary>),
}

pub type EventSender = mpsc::UnboundedSender<AcquisitionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AcquisitionEvent>;

/// Create the channel between an acquisition task and its consumer
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Acquisition loop bound to one serial link
pub struct AcquisitionTask<P: SerialPortIO> {
    link: SerialLink<P>,
    read_timeout: Duration,
    state: Arc<watch::Sender<TaskState>>,
}

impl<P: SerialPortIO + 'static> AcquisitionTask<P> {
    /// Create a task in the `Created` state; nothing is read until `start`
    pub fn new(link: SerialLink<P>, read_timeout: Duration) -> Self {
        let (state, _) = watch::channel(TaskState::Created);
        Self {
            link,
            read_timeout,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Spawn the loop on the current tokio runtime
    ///
    /// The task is `Running` by the time this returns.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self, sink: EventSender) -> AcquisitionHandle {
        let cancel = CancellationToken::new();
        self.state.send_replace(TaskState::Running);

        let state = self.state.clone();
        let join = tokio::spawn(self.run(sink, cancel.clone()));

        AcquisitionHandle {
            cancel,
            state,
            join: Some(join),
        }
    }

    async fn run(mut self, sink: EventSender, cancel: CancellationToken) {
        info!(
            "Acquisition started on {} (read timeout {:?})",
            self.link.device_path(),
            self.read_timeout
        );

        let mut stats = SessionStats::default();
        let outcome = self.acquire(&sink, &cancel, &mut stats).await;
        self.link.close();

        match &outcome {
            Ok(reason) => info!(
                "Acquisition on {} stopped ({:?}): {} samples, {} malformed lines",
                self.link.device_path(),
                reason,
                stats.samples,
                stats.malformed
            ),
            Err(e) => error!(
                "Acquisition on {} failed after {} samples: {}",
                self.link.device_path(),
                stats.samples,
                e
            ),
        }

        // Terminal event goes out before the state flips so a consumer that
        // sees `Stopped` will always find it queued
        let _ = sink.send(AcquisitionEvent::Ended(
            outcome.map(|reason| SessionSummary { reason, stats }),
        ));
        self.state.send_replace(TaskState::Stopped);
    }

    async fn acquire(
        &mut self,
        sink: &EventSender,
        cancel: &CancellationToken,
        stats: &mut SessionStats,
    ) -> Result<StopReason> {
        loop {
            if !self.link.is_open() {
                return Ok(StopReason::DeviceClosed);
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                read = self.link.read_line(self.read_timeout) => read,
            };

            let line = match read? {
                Some(line) => line,
                None => continue,
            };
            stats.lines_read += 1;

            match decoder::parse(&line) {
                Ok(sample) => {
                    if sink.send(AcquisitionEvent::Sample(sample)).is_err() {
                        return Ok(StopReason::ConsumerGone);
                    }
                    stats.samples += 1;
                }
                Err(e) => {
                    stats.malformed += 1;
                    debug!("Discarding line from {}: {}", self.link.device_path(), e);
                }
            }
        }
    }
}

/// Control side of a running acquisition task
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct AcquisitionHandle {
    cancel: CancellationToken,
    state: Arc<watch::Sender<TaskState>>,
    join: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Ask the loop to stop; it closes the link and exits within one read timeout
    ///
    /// Calling it again has no effect.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.cancel.cancel();
        self.state.send_if_modified(|state| {
            if *state == TaskState::Running {
                *state = TaskState::Stopping;
                true
            } else {
                false
            }
        });
        debug!("Acquisition cancellation requested");
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Wait for the task to finish; returns at once if already joined
    pub async fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("Acquisition task did not finish cleanly: {}", e);
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::serial::port_trait::mocks::{MockDevice, MockSerialPort};
    use std::io;
    use tokio::time::{timeout, Instant};

    const READ_TIMEOUT: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(2);

    fn mock_task() -> (AcquisitionTask<MockSerialPort>, MockDevice) {
        let (port, device) = MockSerialPort::new();
        let link = SerialLink::from_port(port, "/dev/mock0");
        (AcquisitionTask::new(link, READ_TIMEOUT), device)
    }

    async fn next_event(events: &mut EventReceiver) -> AcquisitionEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn expect_sample(events: &mut EventReceiver) -> Sample {
        match next_event(events).await {
            AcquisitionEvent::Sample(sample) => sample,
            other => panic!("Expected sample, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_task_is_created() {
        let (task, _device) = mock_task();
        assert_eq!(task.state(), TaskState::Created);
    }

    #[tokio::test]
    async fn test_forwards_samples_in_order() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);
        assert_eq!(handle.state(), TaskState::Running);

        device.send_line("[1, 0]");
        device.send_line("[2, 1000]");
        device.send_line("[3, 2000]");

        assert_eq!(expect_sample(&mut rx).await, Sample::new(0.0, 1.0));
        assert_eq!(expect_sample(&mut rx).await, Sample::new(1.0, 2.0));
        assert_eq!(expect_sample(&mut rx).await, Sample::new(2.0, 3.0));

        handle.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_loop() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);

        for line in ["", "garbage", "[1]", "[1,2,3]", "[4, 5000]"] {
            device.send_line(line);
        }
        assert_eq!(expect_sample(&mut rx).await, Sample::new(5.0, 4.0));
        assert_eq!(handle.state(), TaskState::Running);

        handle.cancel();
        handle.join().await;

        match next_event(&mut rx).await {
            AcquisitionEvent::Ended(Ok(summary)) => {
                assert_eq!(summary.reason, StopReason::Cancelled);
                assert_eq!(summary.stats.lines_read, 5);
                assert_eq!(summary.stats.samples, 1);
                assert_eq!(summary.stats.malformed, 4);
            }
            other => panic!("Expected clean end, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_latency_without_data() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);

        tokio::time::sleep(READ_TIMEOUT * 2).await;

        let started = Instant::now();
        handle.cancel();
        timeout(READ_TIMEOUT * 3, handle.join())
            .await
            .expect("task did not stop within 3 read timeouts");

        assert!(started.elapsed() <= READ_TIMEOUT * 3);
        assert_eq!(handle.state(), TaskState::Stopped);
        assert!(device.is_port_dropped(), "link should be closed on stop");
        assert!(matches!(
            next_event(&mut rx).await,
            AcquisitionEvent::Ended(Ok(SessionSummary { reason: StopReason::Cancelled, .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_twice_is_noop() {
        let (task, _device) = mock_task();
        let (tx, _rx) = event_channel();
        let mut handle = task.start(tx);

        handle.cancel();
        handle.cancel();
        handle.join().await;
        handle.cancel();
        handle.join().await;

        assert_eq!(handle.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_no_samples_after_cancel() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);

        handle.cancel();
        handle.join().await;
        device.send_line("[9, 9000]");

        assert!(matches!(next_event(&mut rx).await, AcquisitionEvent::Ended(Ok(_))));
        assert!(rx.recv().await.is_none(), "channel should close after the terminal event");
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);

        device.send_line("[1, 10]");
        device.fail(io::ErrorKind::BrokenPipe);

        assert_eq!(expect_sample(&mut rx).await, Sample::new(0.01, 1.0));
        match next_event(&mut rx).await {
            AcquisitionEvent::Ended(Err(TelemetryError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("Expected I/O error, got: {:?}", other),
        }

        handle.join().await;
        assert_eq!(handle.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_device_unplugged_ends_session() {
        let (task, device) = mock_task();
        let (tx, mut rx) = event_channel();
        let mut handle = task.start(tx);

        device.disconnect();

        match next_event(&mut rx).await {
            AcquisitionEvent::Ended(Err(TelemetryError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof)
            }
            other => panic!("Expected end of stream, got: {:?}", other),
        }
        handle.join().await;
    }

    #[tokio::test]
    async fn test_closed_link_stops_immediately() {
        let (port, _device) = MockSerialPort::new();
        let mut link = SerialLink::from_port(port, "/dev/mock0");
        link.close();

        let (tx, mut rx) = event_channel();
        let mut handle = AcquisitionTask::new(link, READ_TIMEOUT).start(tx);

        assert!(matches!(
            next_event(&mut rx).await,
            AcquisitionEvent::Ended(Ok(SessionSummary { reason: StopReason::DeviceClosed, .. }))
        ));
        handle.join().await;
    }

    #[tokio::test]
    async fn test_stops_when_consumer_gone() {
        let (task, device) = mock_task();
        let (tx, rx) = event_channel();
        let mut handle = task.start(tx);

        drop(rx);
        device.send_line("[1, 2]");

        timeout(WAIT, handle.join()).await.expect("task should stop");
        assert_eq!(handle.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_task() {
        let (task, device) = mock_task();
        let (tx, _rx) = event_channel();
        let handle = task.start(tx);
        let mut state = handle.subscribe();

        drop(handle);

        timeout(WAIT, state.wait_for(|s| *s == TaskState::Stopped))
            .await
            .expect("task should stop after its handle is dropped")
            .expect("state sender dropped");
        assert!(device.is_port_dropped());
    }
}
