//! Thinking indicator shown while a planning call is in flight.
//!
//! Runs on its own thread so it keeps turning while the async runtime is
//! busy reading the response. `stop` waits until the thread has cleared
//! its line, so nothing printed afterwards lands on top of a frame.

use std::io::{self, IsTerminal, Write};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

pub const FRAME_INTERVAL: Duration = Duration::from_millis(120);
const FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

pub struct Spinner {
    running: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Spinner {
    /// Starts on stderr, but only when stderr is a terminal.
    pub fn start(message: &str) -> Self {
        if !io::stderr().is_terminal() {
            return Self::idle();
        }
        Self::start_on(io::stderr(), message)
    }

    /// A spinner that never draws.
    pub fn idle() -> Self {
        Self { running: None }
    }

    /// Starts drawing frames to `out`.
    pub fn start_on<W: Write + Send + 'static>(mut out: W, message: &str) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let message = message.to_string();
        let handle = std::thread::spawn(move || {
            let mut frame = 0usize;
            loop {
                let _ = write!(out, "\r  {} {message}", FRAMES[frame % FRAMES.len()]);
                let _ = out.flush();
                frame += 1;
                match stop_rx.recv_timeout(FRAME_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = write!(out, "\r\x1b[K");
            let _ = out.flush();
        });
        Self {
            running: Some((stop_tx, handle)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Stops the spinner and waits for its line to be cleared. Idempotent.
    pub fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.running.take() {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}
