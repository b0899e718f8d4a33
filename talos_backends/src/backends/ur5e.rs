// talos_backends/src/backends/ur5e.rs

//! Real-arm adapter. Talks to the arm's control box through a bridge over
//! plain TCP, one JSON document per line: a `read_state` request returns the
//! current joint/gripper/wrench sample, a `command` request returns an
//! ack/nack. Socket timeouts keep every call bounded: a silent bridge
//! surfaces as `BackendUnavailable` or `CommandTimeout`, never as a hung
//! control loop.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use talos_core::adapter::{Backend, BackendAdapter, BackendSession, SessionSlot};
use talos_core::clock::SharedClock;
use talos_core::errors::AdapterError;
use talos_core::messages::{Action, CommandAck, RawState};
use talos_core::types::{BackendId, Wrench};
use tracing::info;

pub struct Ur5eBackend {
    id: BackendId,
    slot: SessionSlot,
    clock: SharedClock,
    host: String,
    port: u16,
    joints: usize,
    link_timeout: Duration,
}

impl Ur5eBackend {
    pub fn new(
        clock: SharedClock,
        host: impl Into<String>,
        port: u16,
        joints: usize,
        link_timeout: Duration,
    ) -> Self {
        Self {
            id: BackendId::from("ur5e"),
            slot: SessionSlot::new(),
            clock,
            host: host.into(),
            port,
            joints,
            link_timeout,
        }
    }
}

impl Backend for Ur5eBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    fn connect(&self) -> Result<BackendSession, AdapterError> {
        let lease = self.slot.claim()?;

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AdapterError::BackendUnavailable(format!("bad address: {e}")))?;
        let stream = TcpStream::connect_timeout(&addr, self.link_timeout)
            .map_err(|e| AdapterError::BackendUnavailable(format!("connect to {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| AdapterError::BackendUnavailable(e.to_string()))?;
        let reader = stream
            .try_clone()
            .map_err(|e| AdapterError::BackendUnavailable(e.to_string()))?;
        info!(%addr, "ur5e bridge connected");

        let adapter = Ur5eAdapter {
            stream,
            reader: BufReader::new(reader),
            clock: Arc::clone(&self.clock),
            joints: self.joints,
            link_timeout: self.link_timeout,
            line: String::new(),
            pending_replies: 0,
        };
        Ok(BackendSession::new(self.id.clone(), Box::new(adapter), lease))
    }
}

// =========================================================================
// == Wire Types ==
// =========================================================================

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireRequest<'a> {
    ReadState,
    Command {
        joint_target: &'a [f64],
        gripper_target: f64,
    },
}

#[derive(Deserialize)]
struct WireState {
    joint_pos: Vec<f64>,
    joint_vel: Vec<f64>,
    gripper_pos: f64,
    wrench: Option<[f64; 6]>,
}

#[derive(Deserialize)]
struct WireAck {
    ok: bool,
    #[serde(default)]
    reason: String,
}

// =========================================================================
// == The Adapter ==
// =========================================================================

/// Grace window for catching a reply the bridge owes from a timed-out
/// command, before the next request goes out.
const STALE_REPLY_GRACE: Duration = Duration::from_millis(2);

struct Ur5eAdapter {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    clock: SharedClock,
    joints: usize,
    link_timeout: Duration,
    line: String,
    /// Replies still owed from commands that timed out. Drained before any
    /// new request so a late ack is never read as the answer to a newer one.
    pending_replies: u32,
}

impl Ur5eAdapter {
    fn drain_stale(&mut self) -> Result<(), AdapterError> {
        while self.pending_replies > 0 {
            if self.read_line(STALE_REPLY_GRACE)?.is_none() {
                break;
            }
            self.pending_replies -= 1;
        }
        Ok(())
    }

    fn send_request(&mut self, request: &WireRequest) -> Result<(), AdapterError> {
        serde_json::to_writer(&mut self.stream, request)
            .map_err(|e| AdapterError::BackendUnavailable(format!("write request: {e}")))?;
        self.stream
            .write_all(b"\n")
            .map_err(|e| AdapterError::BackendUnavailable(format!("write request: {e}")))?;
        Ok(())
    }

    /// Read one response line within `timeout`. `Ok(None)` means the
    /// deadline passed without a byte arriving.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<&str>, AdapterError> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| AdapterError::BackendUnavailable(e.to_string()))?;

        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => Err(AdapterError::BackendUnavailable(
                "bridge closed the connection".into(),
            )),
            Ok(_) => Ok(Some(self.line.trim_end())),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(AdapterError::BackendUnavailable(format!("read: {e}"))),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl BackendAdapter for Ur5eAdapter {
    fn joint_count(&self) -> usize {
        self.joints
    }

    fn read_state(&mut self) -> Result<RawState, AdapterError> {
        self.drain_stale()?;
        self.send_request(&WireRequest::ReadState)?;
        let timeout = self.link_timeout;
        let line = self.read_line(timeout)?.ok_or_else(|| {
            AdapterError::BackendUnavailable(format!("no state sample within {timeout:?}"))
        })?;
        let state: WireState = serde_json::from_str(line)
            .map_err(|e| AdapterError::BackendUnavailable(format!("bad state sample: {e}")))?;

        if state.joint_pos.len() != self.joints || state.joint_vel.len() != self.joints {
            return Err(AdapterError::BackendUnavailable(format!(
                "bridge reported {} joints, expected {}",
                state.joint_pos.len(),
                self.joints
            )));
        }
        Ok(RawState {
            timestamp: self.clock.now(),
            joint_pos: DVector::from_vec(state.joint_pos),
            joint_vel: DVector::from_vec(state.joint_vel),
            gripper_pos: state.gripper_pos,
            wrench: state.wrench.map(|w| Wrench::from_row_slice(&w)),
        })
    }

    fn send_command(
        &mut self,
        action: &Action,
        timeout: Duration,
    ) -> Result<CommandAck, AdapterError> {
        self.drain_stale()?;
        self.send_request(&WireRequest::Command {
            joint_target: action.joint_target.as_slice(),
            gripper_target: action.gripper_target,
        })?;

        if self.read_line(timeout)?.is_none() {
            self.pending_replies += 1;
            return Err(AdapterError::CommandTimeout { timeout });
        }
        let line = self.line.trim_end();
        let ack: WireAck = serde_json::from_str(line)
            .map_err(|e| AdapterError::BackendUnavailable(format!("bad ack: {e}")))?;

        if ack.ok {
            Ok(CommandAck {
                accepted_at: self.clock.now(),
            })
        } else {
            Err(AdapterError::CommandRejected(ack.reason))
        }
    }

    fn disconnect(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
