//! Controller session: send-window flow control, FIFO response matching,
//! and the `stat`-driven ready/paused/moving/error/program state machine.
//!
//! The session owns no I/O of its own. A driver loop owns the
//! [`Communicator`](crate::communication::Communicator), writes the frames
//! [`ControllerSession::drain`] and [`ControllerSession::init_sequence`]
//! hand back, and feeds received lines into [`ControllerSession::on_frame`].
//! This keeps the protocol state machine testable without a real port or a
//! background thread, and matches the single-threaded cooperative reference
//! model: a multi-threaded driver just runs the read/write halves on their
//! own threads around the same session, guarded by its internal locks.

use crate::wire::{self, gcode_frame, query_frame, set_frame, ControlChar, InboundFrame, MachineStat};
use crossbeam_channel::{bounded, Receiver, Sender};
use gcodekit4_core::{Error, Result};
use gcodekit4_parser::processors::ToolChangeController;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Live session status, rebuilt incrementally from `sr`/`qr` fragments.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub stat: Option<MachineStat>,
    pub ready: bool,
    pub paused: bool,
    pub moving: bool,
    pub error: bool,
    pub program: bool,
    pub planner_queue_size: Option<u64>,
    pub planner_queue_free: u64,
}

impl SessionStatus {
    fn apply_stat(&mut self, code: u64) {
        if let Some(stat) = MachineStat::from_code(code) {
            let (ready, paused, moving, error, program) = stat.flags();
            self.stat = Some(stat);
            self.ready = ready;
            self.paused = paused;
            self.moving = moving;
            self.error = error;
            self.program = program;
        }
    }

    fn queue_drained(&self) -> bool {
        matches!(self.planner_queue_size, Some(size) if self.planner_queue_free == size)
    }
}

struct PendingLine {
    frame: String,
    waiter: Sender<Result<Value>>,
}

/// The outstanding work a driver loop must act on after a call that
/// mutates session state: frames to write, and/or a control byte.
#[derive(Debug, Default)]
pub struct DriverWork {
    pub frames: Vec<String>,
    pub control: Option<ControlChar>,
}

struct Inner {
    lines_to_send: i64,
    pending: VecDeque<PendingLine>,
    in_flight: VecDeque<Sender<Result<Value>>>,
    status: SessionStatus,
    status_subscribers: Vec<Sender<Result<SessionStatus>>>,
}

/// Drives the controller's JSON line protocol: send-window credit, FIFO
/// response matching, and the status state machine described in
/// the status-report reducer table.
pub struct ControllerSession {
    axis_labels: Vec<char>,
    initial_credit: i64,
    status_interval_ms: u64,
    inner: Mutex<Inner>,
}

impl ControllerSession {
    /// A session tracking `axis_labels`, with a send window of
    /// `initial_credit` lines (spec default: 4) and status reports
    /// requested every `status_interval_ms`.
    pub fn new(axis_labels: Vec<char>, initial_credit: i64, status_interval_ms: u64) -> Self {
        Self {
            axis_labels,
            initial_credit,
            status_interval_ms,
            inner: Mutex::new(Inner {
                lines_to_send: initial_credit,
                pending: VecDeque::new(),
                in_flight: VecDeque::new(),
                status: SessionStatus::default(),
                status_subscribers: Vec::new(),
            }),
        }
    }

    /// Frames to write once, immediately after the port opens: strict-JSON
    /// on, echo off, JSON verbosity, filtered status reports at the
    /// configured interval, status-report field configuration, and an
    /// initial status-report fetch.
    pub fn init_sequence(&self) -> Vec<String> {
        vec![
            set_frame("ex", Value::from(2)),
            set_frame("ee", Value::from(0)),
            set_frame("jv", Value::from(3)),
            set_frame("si", Value::from(self.status_interval_ms)),
            wire::status_report_fields(&self.axis_labels).to_string(),
            query_frame("sr"),
        ]
    }

    /// Enqueue a line of gcode, returning the receiver its response (or
    /// rejection) will arrive on, plus any frames now unblocked by
    /// available send-window credit.
    pub fn send_wait(&self, line: &str) -> (Receiver<Result<Value>>, DriverWork) {
        let (tx, rx) = bounded(1);
        let mut inner = self.inner.lock();
        inner.pending.push_back(PendingLine {
            frame: gcode_frame(line),
            waiter: tx,
        });
        let frames = Self::drain_locked(&mut inner);
        (rx, DriverWork { frames, control: None })
    }

    fn drain_locked(inner: &mut Inner) -> Vec<String> {
        let mut out = Vec::new();
        while inner.lines_to_send > 0 {
            let Some(p) = inner.pending.pop_front() else { break };
            inner.lines_to_send -= 1;
            inner.in_flight.push_back(p.waiter);
            out.push(p.frame);
        }
        out
    }

    /// Issue (or skip) a status-report request and subscribe for the
    /// condition `!moving && planner_queue_free == planner_queue_size`.
    /// Resolves with `Ok(())` on the first satisfying update, or
    /// `Err(Cancelled)`/machine error on a transition to error. Status
    /// updates that satisfy neither condition (an intermediate `sr`/`qr`
    /// fragment) are not a failure: the wait keeps subscribing until one
    /// does.
    pub fn wait_sync(self: &Arc<Self>) -> (Receiver<Result<()>>, DriverWork) {
        let (tx, rx) = bounded(1);
        let mut inner = self.inner.lock();
        if !inner.status.moving && inner.status.queue_drained() {
            let _ = tx.send(Ok(()));
            return (rx, DriverWork::default());
        }
        let (sub_tx, sub_rx) = bounded(1);
        inner.status_subscribers.push(sub_tx);
        drop(inner);

        // Bridge the raw status subscription into the moving/queue predicate,
        // re-subscribing on every update that doesn't yet satisfy it.
        let session = Arc::clone(self);
        std::thread::spawn(move || {
            let mut sub_rx = sub_rx;
            loop {
                let Ok(result) = sub_rx.recv() else { return };
                match result {
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                    Ok(s) if s.error => {
                        let _ = tx.send(Err(Error::machine("alarm", "session entered error state")));
                        return;
                    }
                    Ok(s) if !s.moving && s.queue_drained() => {
                        let _ = tx.send(Ok(()));
                        return;
                    }
                    Ok(_) => {
                        let (next_tx, next_rx) = bounded(1);
                        session.inner.lock().status_subscribers.push(next_tx);
                        sub_rx = next_rx;
                    }
                }
            }
        });

        (rx, DriverWork { frames: vec![query_frame("sr")], control: None })
    }

    /// Clear the send queue, fail every pending waiter with [`Error::Cancelled`],
    /// and return the cancel control character for the driver to write.
    pub fn cancel(&self) -> DriverWork {
        let mut inner = self.inner.lock();
        for p in inner.pending.drain(..) {
            let _ = p.waiter.send(Err(Error::Cancelled));
        }
        for w in inner.in_flight.drain(..) {
            let _ = w.send(Err(Error::Cancelled));
        }
        for s in inner.status_subscribers.drain(..) {
            let _ = s.send(Err(Error::Cancelled));
        }
        DriverWork { frames: Vec::new(), control: Some(ControlChar::Cancel) }
    }

    /// Feed one received line into the session, resolving waiters and
    /// updating status. Returns frames newly unblocked by send-window
    /// credit returned from a response.
    pub fn on_frame(&self, raw: &str) -> Result<DriverWork> {
        let frame = wire::parse_inbound(raw)?;
        let mut inner = self.inner.lock();
        match frame {
            InboundFrame::Response { body, status_code } => {
                inner.lines_to_send += 1;
                if let Some(waiter) = inner.in_flight.pop_front() {
                    let result = if status_code == 0 {
                        Ok(body)
                    } else {
                        Err(Error::machine(status_code.to_string(), "non-zero controller footer"))
                    };
                    let _ = waiter.send(result);
                }
                let frames = Self::drain_locked(&mut inner);
                Ok(DriverWork { frames, control: None })
            }
            InboundFrame::QueueFree(n) => {
                if inner.status.planner_queue_size.is_none() {
                    inner.status.planner_queue_size = Some(n);
                }
                inner.status.planner_queue_free = n;
                self.notify_subscribers(&mut inner);
                Ok(DriverWork::default())
            }
            InboundFrame::StatusReport(sr) => {
                if let Some(stat) = sr.get("stat").and_then(Value::as_u64) {
                    inner.status.apply_stat(stat);
                }
                self.notify_subscribers(&mut inner);
                Ok(DriverWork::default())
            }
            InboundFrame::Unrecognized(_) => Ok(DriverWork::default()),
        }
    }

    fn notify_subscribers(&self, inner: &mut Inner) {
        let status = inner.status.clone();
        for s in inner.status_subscribers.drain(..) {
            let _ = s.send(Ok(status.clone()));
        }
    }

    /// A snapshot of the current status.
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status.clone()
    }

    /// Lines currently permitted to be written before exhausting credit.
    pub fn lines_to_send(&self) -> i64 {
        self.inner.lock().lines_to_send
    }
}

/// Write the outstanding frames and control byte from a [`DriverWork`] to
/// the wire: newline-terminated JSON frames, then the raw control byte
/// with no trailing newline.
pub fn write_work(comm: &mut dyn crate::communication::Communicator, work: &DriverWork) -> Result<()> {
    for frame in &work.frames {
        comm.send(frame.as_bytes())?;
        comm.send(b"\n")?;
    }
    if let Some(control) = work.control {
        comm.send(&[control.as_byte()])?;
    }
    Ok(())
}

/// Signals an operator's resume action to a blocked [`SessionToolChangeController`].
#[derive(Clone)]
pub struct ResumeHandle {
    tx: Sender<()>,
}

impl ResumeHandle {
    /// Wake the paired controller's `await_resume` call.
    pub fn resume(&self) {
        let _ = self.tx.send(());
    }
}

/// Implements `gcodekit4_parser`'s `ToolChangeController` against a live
/// [`ControllerSession`]. Spindle/coolant *restore* is left to the
/// processor's own modal resync lines (emitted as ordinary gcode through
/// the chain) rather than duplicated here; only the pre-macro stop and the
/// operator resume gate are driven directly.
pub struct SessionToolChangeController {
    session: Arc<ControllerSession>,
    comm: Arc<Mutex<Box<dyn crate::communication::Communicator>>>,
    resume_rx: Receiver<()>,
}

impl SessionToolChangeController {
    /// A controller paired with a fresh [`ResumeHandle`] for signalling resume.
    pub fn new(
        session: Arc<ControllerSession>,
        comm: Arc<Mutex<Box<dyn crate::communication::Communicator>>>,
    ) -> (Self, ResumeHandle) {
        let (tx, rx) = bounded(1);
        (Self { session, comm, resume_rx: rx }, ResumeHandle { tx })
    }

    fn send_blocking(&self, gcode: &str) -> Result<()> {
        let (rx, work) = self.session.send_wait(gcode);
        write_work(&mut **self.comm.lock(), &work)?;
        rx.recv().map_err(|_| Error::comm("session closed while waiting for response"))??;
        Ok(())
    }
}

impl ToolChangeController for SessionToolChangeController {
    fn wait_sync(&mut self) -> Result<()> {
        let (rx, work) = self.session.wait_sync();
        write_work(&mut **self.comm.lock(), &work)?;
        rx.recv().map_err(|_| Error::comm("session closed while waiting for sync"))?
    }

    fn pause_spindle_and_coolant(&mut self) -> Result<()> {
        self.send_blocking("M5")?;
        self.send_blocking("M9")
    }

    fn restore_spindle_and_coolant(&mut self) -> Result<()> {
        Ok(())
    }

    fn await_resume(&mut self) -> Result<()> {
        self.resume_rx
            .recv()
            .map_err(|_| Error::comm("resume handle dropped before signal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_wait_resolves_on_matching_response() {
        let session = ControllerSession::new(vec!['x', 'y', 'z'], 4, 200);
        let (rx, work) = session.send_wait("G1 X1");
        assert_eq!(work.frames, vec![gcode_frame("G1 X1")]);
        assert_eq!(session.lines_to_send(), 3);

        session.on_frame(r#"{"r":{"n":42},"f":[1,0,0,0]}"#).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::from(serde_json::json!({"n": 42})));
        assert_eq!(session.lines_to_send(), 4);
    }

    #[test]
    fn non_zero_footer_rejects_with_machine_error() {
        let session = ControllerSession::new(vec!['x', 'y', 'z'], 4, 200);
        let (rx, _work) = session.send_wait("G1 X1");
        session.on_frame(r#"{"r":{},"f":[1,35,0,0]}"#).unwrap();
        assert!(rx.try_recv().unwrap().unwrap_err().is_machine_error());
    }

    #[test]
    fn queue_free_seeds_planner_size_from_first_report() {
        let session = ControllerSession::new(vec!['x', 'y', 'z'], 4, 200);
        session.on_frame(r#"{"qr":4}"#).unwrap();
        let status = session.status();
        assert_eq!(status.planner_queue_size, Some(4));
        assert_eq!(status.planner_queue_free, 4);
    }

    #[test]
    fn send_window_blocks_past_credit() {
        let session = ControllerSession::new(vec!['x', 'y', 'z'], 1, 200);
        let (_rx1, work1) = session.send_wait("G1 X1");
        assert_eq!(work1.frames.len(), 1);
        let (_rx2, work2) = session.send_wait("G1 X2");
        assert!(work2.frames.is_empty());
    }

    #[test]
    fn wait_sync_ignores_non_satisfying_updates_and_resolves_on_a_later_one() {
        let session = Arc::new(ControllerSession::new(vec!['x', 'y', 'z'], 4, 200));
        session.on_frame(r#"{"qr":4}"#).unwrap();
        session.on_frame(r#"{"sr":{"stat":5}}"#).unwrap(); // Run: moving

        let (rx, _work) = session.wait_sync();
        assert!(rx.try_recv().is_err());

        session.on_frame(r#"{"sr":{"stat":5}}"#).unwrap(); // still moving
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(rx.try_recv().is_err());

        session.on_frame(r#"{"sr":{"stat":4}}"#).unwrap(); // End: queue already drained
        assert!(rx.recv().unwrap().is_ok());
    }

    #[test]
    fn cancel_fails_pending_and_in_flight_waiters() {
        let session = ControllerSession::new(vec!['x', 'y', 'z'], 1, 200);
        let (rx1, _w1) = session.send_wait("G1 X1");
        let (rx2, _w2) = session.send_wait("G1 X2");
        let work = session.cancel();
        assert_eq!(work.control, Some(ControlChar::Cancel));
        assert!(rx1.try_recv().unwrap().unwrap_err().is_cancelled());
        assert!(rx2.try_recv().unwrap().unwrap_err().is_cancelled());
    }
}
