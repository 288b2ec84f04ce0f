use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

pub mod cli;
pub mod util;

/// How often a paused core checks for new control messages
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Pause,
    Resume,
    /// Run exactly one unit of work, then pause again
    Step,
    Stop,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Running,
    Paused,
    Stopped,
}

/// Sending half, owned by a debugger front end (usually on another thread)
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<ControlMessage>,
}

impl ControlHandle {
    pub fn send(&self, msg: ControlMessage) -> Result<(), anyhow::Error> {
        self.tx.send(msg).map_err(|_| anyhow::anyhow!("Core is gone"))
    }
    pub fn pause(&self) -> Result<(), anyhow::Error> {
        self.send(ControlMessage::Pause)
    }
    pub fn resume(&self) -> Result<(), anyhow::Error> {
        self.send(ControlMessage::Resume)
    }
    pub fn step(&self) -> Result<(), anyhow::Error> {
        self.send(ControlMessage::Step)
    }
    pub fn stop(&self) -> Result<(), anyhow::Error> {
        self.send(ControlMessage::Stop)
    }
}

/// Receiving half, polled by the execution loop between units of work.
///
/// The controller is the only place where execution can be suspended. While paused it
/// sleeps in `POLL_INTERVAL` slices and the caller must not advance any emulated time.
pub struct StepController {
    rx: Receiver<ControlMessage>,
    status: Status,
    pending_steps: u32,
    detached: bool,
    poll_interval: Duration,
}

/// Create a connected handle/controller pair
pub fn control_channel(start_paused: bool) -> (ControlHandle, StepController) {
    let (tx, rx) = mpsc::channel();
    let status = if start_paused { Status::Paused } else { Status::Running };
    (
        ControlHandle { tx },
        StepController {
            rx,
            status,
            pending_steps: 0,
            detached: false,
            poll_interval: POLL_INTERVAL,
        },
    )
}

impl StepController {
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.apply(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.detached {
                        log::debug!("control handle dropped");
                    }
                    self.detached = true;
                    break;
                }
            }
        }
        // Nobody is left to resume us
        if self.detached && self.status == Status::Paused && self.pending_steps == 0 {
            self.status = Status::Stopped;
        }
    }

    fn apply(&mut self, msg: ControlMessage) {
        if self.status == Status::Stopped {
            return;
        }
        match msg {
            ControlMessage::Pause => self.status = Status::Paused,
            ControlMessage::Resume => {
                self.status = Status::Running;
                self.pending_steps = 0;
            }
            ControlMessage::Step => {
                self.status = Status::Paused;
                self.pending_steps += 1;
            }
            ControlMessage::Stop => self.status = Status::Stopped,
        }
    }

    /// Non-blocking check used at block boundaries
    pub fn stop_requested(&mut self) -> bool {
        self.drain();
        self.status == Status::Stopped
    }

    /// Blocks until the next unit of work may run.
    ///
    /// Returns false once a stop has been requested.
    pub fn wait_resumed(&mut self) -> bool {
        loop {
            self.drain();
            match self.status {
                Status::Running => return true,
                Status::Stopped => return false,
                Status::Paused if self.pending_steps > 0 => {
                    self.pending_steps -= 1;
                    return true;
                }
                Status::Paused => std::thread::sleep(self.poll_interval),
            }
        }
    }
}
