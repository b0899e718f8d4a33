// talos_backends/tests/ur5e_link.rs

//! The UR5e adapter against a scripted TCP bridge: state sampling, command
//! ack/nack mapping, bounded command waits, and link-loss reporting.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use talos_backends::backends::Ur5eBackend;
use talos_core::prelude::*;

/// One-connection bridge. Commands with `joint_target[0] > 1.0` are
/// refused; `joint_target[0] == 0.5` gets no reply at all;
/// `joint_target[0] == 0.75` is acked only after 150 ms.
fn spawn_bridge() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let join = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        serve(stream);
    });
    (addr, join)
}

fn serve(stream: TcpStream) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let request: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => return,
        };
        let reply = match request["op"].as_str() {
            Some("read_state") => Some(
                serde_json::json!({
                    "joint_pos": [0.0, -1.57, 1.57, -1.57, -1.57, 0.0],
                    "joint_vel": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    "gripper_pos": 12.0,
                    "wrench": [0.1, 0.0, -0.2, 0.0, 0.0, 0.0],
                })
                .to_string(),
            ),
            Some("command") => {
                let target0 = request["joint_target"][0].as_f64().unwrap_or(0.0);
                if (target0 - 0.5).abs() < 1e-9 {
                    None // never acknowledge
                } else if (target0 - 0.75).abs() < 1e-9 {
                    thread::sleep(Duration::from_millis(150));
                    Some(r#"{"ok":true}"#.to_string())
                } else if target0 > 1.0 {
                    Some(r#"{"ok":false,"reason":"joint 0 out of range"}"#.to_string())
                } else {
                    Some(r#"{"ok":true}"#.to_string())
                }
            }
            _ => return,
        };
        if let Some(reply) = reply {
            if writeln!(writer, "{reply}").is_err() {
                return;
            }
        }
    }
}

fn backend_for(addr: SocketAddr) -> Ur5eBackend {
    Ur5eBackend::new(
        Arc::new(MonotonicClock::new()),
        addr.ip().to_string(),
        addr.port(),
        6,
        Duration::from_millis(500),
    )
}

fn command(target0: f64) -> Action {
    let mut joint_target = JointVector::zeros(6);
    joint_target[0] = target0;
    Action {
        joint_target,
        gripper_target: 0.0,
        source: ActionSource::Policy,
    }
}

#[test]
fn state_samples_come_back_typed_and_stamped() {
    let (addr, _bridge) = spawn_bridge();
    let backend = backend_for(addr);
    let mut session = backend.connect().unwrap();

    let state = session.read_state().unwrap();
    assert_eq!(state.joint_pos.len(), 6);
    assert!((state.joint_pos[1] + 1.57).abs() < 1e-9);
    assert_eq!(state.gripper_pos, 12.0);
    assert!(state.wrench.is_some());
    assert!(state.timestamp >= 0.0);

    // Second connect while the session lives is refused locally.
    assert!(matches!(backend.connect(), Err(AdapterError::SessionBusy)));
}

#[test]
fn acks_and_nacks_map_to_the_error_taxonomy() {
    let (addr, _bridge) = spawn_bridge();
    let backend = backend_for(addr);
    let mut session = backend.connect().unwrap();

    session
        .send_command(&command(0.2), Duration::from_millis(200))
        .unwrap();

    let err = session
        .send_command(&command(2.0), Duration::from_millis(200))
        .unwrap_err();
    assert!(matches!(err, AdapterError::CommandRejected(reason) if reason.contains("range")));
}

#[test]
fn silent_bridge_times_out_instead_of_hanging() {
    let (addr, _bridge) = spawn_bridge();
    let backend = backend_for(addr);
    let mut session = backend.connect().unwrap();

    let started = std::time::Instant::now();
    let err = session
        .send_command(&command(0.5), Duration::from_millis(60))
        .unwrap_err();
    assert!(matches!(err, AdapterError::CommandTimeout { .. }));
    // The call honored its bound rather than waiting on the bridge.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn late_ack_is_drained_not_misread() {
    let (addr, _bridge) = spawn_bridge();
    let backend = backend_for(addr);
    let mut session = backend.connect().unwrap();

    // The bridge acks this command, but only after the caller's deadline.
    let err = session
        .send_command(&command(0.75), Duration::from_millis(60))
        .unwrap_err();
    assert!(matches!(err, AdapterError::CommandTimeout { .. }));

    // By now the stale ack sits in the socket buffer. It must not be read
    // as the next state sample.
    thread::sleep(Duration::from_millis(200));
    let state = session.read_state().unwrap();
    assert_eq!(state.joint_pos.len(), 6);

    // Commands pair up with their own acks again.
    session
        .send_command(&command(0.2), Duration::from_millis(200))
        .unwrap();
}

#[test]
fn dropped_link_reports_backend_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept and immediately hang up.
    let bridge = thread::spawn(move || {
        let _ = listener.accept();
    });

    let backend = backend_for(addr);
    let mut session = backend.connect().unwrap();
    bridge.join().unwrap();

    let err = session.read_state().unwrap_err();
    assert!(matches!(err, AdapterError::BackendUnavailable(_)));
}

#[test]
fn unreachable_bridge_fails_at_connect() {
    // A port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = backend_for(addr);
    assert!(matches!(
        backend.connect(),
        Err(AdapterError::BackendUnavailable(_))
    ));
}
