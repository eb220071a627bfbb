//! # Acquisition Controller
//!
//! Connect/disconnect orchestration and the consumer side of the sample channel.
//!
//! The controller owns the sliding window outright. Only the thread calling
//! [`AcquisitionController::drain_step`] ever mutates it, so the window needs
//! no locking; the channel is the only structure shared with the task.

use std::io;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{info, warn};

use super::{
    event_channel, AcquisitionEvent, AcquisitionHandle, AcquisitionTask, EventReceiver,
    SessionSummary, TaskState,
};
use crate::config::ConnectionConfig;
use crate::error::{Result, TelemetryError};
use crate::record::Sample;
use crate::serial::port_trait::SerialPortIO;
use crate::serial::SerialLink;
use crate::window::SlidingWindowBuffer;

/// One connection: the running task and the receiving end of its channel
struct Session {
    task: AcquisitionHandle,
    events: EventReceiver,
    device_path: String,
}

/// Lifecycle owner for acquisition sessions and their sliding window
pub struct AcquisitionController {
    window: SlidingWindowBuffer,
    session: Option<Session>,
    last_session: Option<SessionSummary>,
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("device_path", &self.device_path())
            .field("task_state", &self.task_state())
            .field("window_len", &self.window.len())
            .finish_non_exhaustive()
    }
}

impl AcquisitionController {
    /// Create a disconnected controller with a window of `capacity` samples
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            window: SlidingWindowBuffer::new(capacity)?,
            session: None,
            last_session: None,
        })
    }

    /// Open the device and start acquiring
    ///
    /// The window is cleared first so samples from a previous session never
    /// mix with the new one.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a session is still running (nothing changes)
    /// - `Connection` if the device cannot be opened
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.ensure_idle()?;
        self.window.reset();

        let link = SerialLink::open(config).await?;
        self.start_session(link, config.read_timeout);
        Ok(())
    }

    /// Start acquiring from an already-open link
    ///
    /// Same semantics as [`connect`](Self::connect) without opening a device.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` if a session is still running.
    pub fn connect_link<P: SerialPortIO + 'static>(
        &mut self,
        link: SerialLink<P>,
        read_timeout: Duration,
    ) -> Result<()> {
        self.ensure_idle()?;
        self.window.reset();
        self.start_session(link, read_timeout);
        Ok(())
    }

    /// Stop the running session and wait for the task to finish
    ///
    /// Samples queued before the stop are still applied to the window.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(summary))` - Session stopped
    /// * `Ok(None)` - Nothing was connected
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the session had already failed before it could
    /// be cancelled.
    pub async fn disconnect(&mut self) -> Result<Option<SessionSummary>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        session.task.cancel();
        session.task.join().await;

        let mut outcome = None;
        while let Ok(event) = session.events.try_recv() {
            match event {
                AcquisitionEvent::Sample(sample) => self.window.push(sample),
                AcquisitionEvent::Ended(end) => outcome = Some(end),
            }
        }

        info!("Disconnected from {}", session.device_path);
        match outcome {
            Some(Ok(summary)) => {
                self.last_session = Some(summary);
                Ok(Some(summary))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Move every queued sample into the window, in arrival order
    ///
    /// Never waits: returns `Ok(0)` at once when nothing is queued or nothing
    /// is connected.
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of samples applied
    ///
    /// # Errors
    ///
    /// Returns the I/O error that ended the session, once, after applying the
    /// samples received before it. The controller is disconnected afterwards
    /// and a new [`connect`](Self::connect) is needed.
    pub fn drain_step(&mut self) -> Result<usize> {
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };

        let mut applied = 0;
        let ended = loop {
            match session.events.try_recv() {
                Ok(AcquisitionEvent::Sample(sample)) => {
                    self.window.push(sample);
                    applied += 1;
                }
                Ok(AcquisitionEvent::Ended(end)) => break Some(end),
                Err(TryRecvError::Empty) => break None,
                Err(TryRecvError::Disconnected) => {
                    break Some(Err(io::Error::new(
                        io::ErrorKind::Other,
                        "acquisition task exited without reporting",
                    )
                    .into()))
                }
            }
        };

        let Some(end) = ended else {
            return Ok(applied);
        };

        let device_path = session.device_path.clone();
        self.session = None;

        match end {
            Ok(summary) => {
                info!("Session on {} ended: {:?}", device_path, summary.reason);
                self.last_session = Some(summary);
                Ok(applied)
            }
            Err(e) => {
                warn!("Session on {} lost: {}. Reconnect to resume.", device_path, e);
                Err(e)
            }
        }
    }

    /// Current window contents, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.window.snapshot()
    }

    pub fn window(&self) -> &SlidingWindowBuffer {
        &self.window
    }

    /// True while a session's task is running or stopping
    pub fn is_connected(&self) -> bool {
        self.task_state()
            .is_some_and(|state| state != TaskState::Stopped)
    }

    /// True until the end of the current session has been drained
    ///
    /// Stays set after the task stops on its own, so the error that ended it
    /// is still returned by the next [`drain_step`](Self::drain_step).
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn task_state(&self) -> Option<TaskState> {
        self.session.as_ref().map(|s| s.task.state())
    }

    /// Device path of the current session
    pub fn device_path(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.device_path.as_str())
    }

    /// Summary of the most recent session that ended cleanly
    pub fn last_session(&self) -> Option<&SessionSummary> {
        self.last_session.as_ref()
    }

    /// Refuse while a session runs; reap one that already stopped on its own
    fn ensure_idle(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(TelemetryError::AlreadyConnected);
        }

        if let Some(mut stale) = self.session.take() {
            while let Ok(event) = stale.events.try_recv() {
                match event {
                    AcquisitionEvent::Ended(Ok(summary)) => self.last_session = Some(summary),
                    AcquisitionEvent::Ended(Err(e)) => {
                        warn!("Previous session on {} ended with: {}", stale.device_path, e)
                    }
                    AcquisitionEvent::Sample(_) => {}
                }
            }
        }

        Ok(())
    }

    fn start_session<P: SerialPortIO + 'static>(
        &mut self,
        link: SerialLink<P>,
        read_timeout: Duration,
    ) {
        let device_path = link.device_path().to_string();
        let (tx, rx) = event_channel();
        let task = AcquisitionTask::new(link, read_timeout).start(tx);

        info!("Connected to {}", device_path);
        self.session = Some(Session {
            task,
            events: rx,
            device_path,
        });
    }
}
