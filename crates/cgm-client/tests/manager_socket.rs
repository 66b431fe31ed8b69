// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Exercise the manager client against a socket-level stub manager.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use cgm_client::wire::{encode_line, Request, Response};
use cgm_client::{
    CgroupKey, CgroupManager, ChildProcessError, CreateRunner, ManagerHandle, RpcError,
};
use serde_json::json;

/// Stub manager accepting one connection per scripted response. Every
/// connection is answered with `version` on the opening version check;
/// the recorded requests are returned when the thread is joined.
fn spawn_stub(
    version: i32,
    responses: Vec<Response>,
) -> (PathBuf, tempfile::TempDir, thread::JoinHandle<Vec<Request>>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("manager.sock");
    let listener = UnixListener::bind(&socket).expect("bind stub socket");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for response in responses {
            let Ok((stream, _)) = listener.accept() else {
                break;
            };
            serve_connection(stream, version, &mut seen, response);
        }
        seen
    });
    (socket, dir, handle)
}

fn serve_connection(stream: UnixStream, version: i32, seen: &mut Vec<Request>, response: Response) {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    let hello: Request = serde_json::from_str(line.trim_end()).expect("version frame");
    assert_eq!(hello, Request::ApiVersion);
    write_frame(reader.get_mut(), &Response::ok(json!(version)));

    line.clear();
    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }
    let request: Request = serde_json::from_str(line.trim_end()).expect("request frame");
    seen.push(request);
    write_frame(reader.get_mut(), &response);
}

fn write_frame(stream: &mut UnixStream, response: &Response) {
    let bytes = encode_line(response).expect("encode response");
    stream.write_all(&bytes).expect("write response");
}

#[test]
fn lists_controllers_over_the_socket() {
    let (socket, _dir, stub) = spawn_stub(9, vec![Response::ok(json!(["freezer", "memory"]))]);
    let handle = ManagerHandle::new(&socket);

    let controllers = handle.list_controllers().expect("list controllers");
    assert_eq!(controllers, vec!["freezer".to_owned(), "memory".to_owned()]);

    let seen = stub.join().expect("stub thread");
    assert_eq!(seen, vec![Request::ListControllers]);
}

#[test]
fn rejects_managers_below_the_required_version() {
    let (socket, _dir, stub) = spawn_stub(8, vec![Response::ok_empty()]);
    let handle = ManagerHandle::new(&socket);

    let err = handle.list_controllers().expect_err("version gate");
    assert!(matches!(
        err,
        RpcError::IncompatibleVersion {
            found: 8,
            required: 9
        }
    ));

    let seen = stub.join().expect("stub thread");
    assert!(seen.is_empty(), "no call should pass the version gate");
}

#[test]
fn connect_failures_are_typed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("absent.sock");
    let handle = ManagerHandle::new(&socket);
    assert_eq!(handle.socket(), socket);

    let err = handle.list_controllers().expect_err("connect failure");
    assert!(matches!(err, RpcError::ConnectFailed { .. }));
}

#[test]
fn the_default_socket_is_the_well_known_path() {
    let handle = ManagerHandle::with_default_socket();
    assert_eq!(
        handle.socket(),
        std::path::Path::new(cgm_client::DEFAULT_MANAGER_SOCKET)
    );
}

#[test]
fn call_failures_carry_the_method_name() {
    let (socket, _dir, stub) = spawn_stub(9, vec![Response::err("no such controller")]);
    let handle = ManagerHandle::new(&socket);

    let err = handle
        .list_keys("freezer", "absent")
        .expect_err("manager error");
    match err {
        RpcError::CallFailed { method, message } => {
            assert_eq!(method, "list_keys");
            assert_eq!(message, "no such controller");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let _ = stub.join();
}

#[test]
fn decodes_key_listings_with_ownership() {
    let payload = json!([
        {"name": "tasks", "uid": 1000, "gid": 1000, "mode": 420},
        {"name": "freezer.state", "uid": 0, "gid": 0, "mode": 384}
    ]);
    let (socket, _dir, stub) = spawn_stub(9, vec![Response::ok(payload)]);
    let handle = ManagerHandle::new(&socket);

    let keys = handle.list_keys("freezer", "jobs").expect("list keys");
    assert_eq!(
        keys,
        vec![
            CgroupKey {
                name: "tasks".to_owned(),
                uid: 1000,
                gid: 1000,
                mode: 0o644,
            },
            CgroupKey {
                name: "freezer.state".to_owned(),
                uid: 0,
                gid: 0,
                mode: 0o600,
            },
        ]
    );

    let _ = stub.join();
}

#[test]
fn each_call_opens_a_fresh_connection() {
    let (socket, _dir, stub) = spawn_stub(
        9,
        vec![
            Response::ok(json!("jobs")),
            Response::ok(json!(["a", "b"])),
        ],
    );
    let handle = ManagerHandle::new(&socket);

    let own = handle.get_pid_cgroup(42, "freezer").expect("pid cgroup");
    assert_eq!(own, "jobs");
    let children = handle.list_children("freezer", "jobs").expect("children");
    assert_eq!(children, vec!["a".to_owned(), "b".to_owned()]);

    let seen = stub.join().expect("stub thread");
    assert_eq!(
        seen,
        vec![
            Request::GetPidCgroup {
                controller: "freezer".to_owned(),
                pid: 42,
            },
            Request::ListChildren {
                controller: "freezer".to_owned(),
                cgroup: "jobs".to_owned(),
            },
        ]
    );
}

#[test]
fn escape_moves_own_pid_to_the_absolute_root() {
    let (socket, _dir, stub) = spawn_stub(9, vec![Response::ok_empty()]);
    let handle = ManagerHandle::new(&socket);

    handle.escape_to_root_cgroup().expect("escape");

    let seen = stub.join().expect("stub thread");
    assert_eq!(
        seen,
        vec![Request::MovePidAbs {
            controller: "all".to_owned(),
            cgroup: "/".to_owned(),
            pid: std::process::id() as i32,
        }]
    );
}

#[test]
fn remove_is_always_recursive() {
    let (socket, _dir, stub) = spawn_stub(9, vec![Response::ok_empty()]);
    let handle = ManagerHandle::new(&socket);

    handle.remove("freezer", "jobs/batch").expect("remove");

    let seen = stub.join().expect("stub thread");
    assert_eq!(
        seen,
        vec![Request::Remove {
            controller: "freezer".to_owned(),
            cgroup: "jobs/batch".to_owned(),
            recursive: true,
        }]
    );
}

struct RecordingRunner {
    calls: Arc<Mutex<Vec<(u32, u32, String, String)>>>,
    fail: bool,
}

impl CreateRunner for RecordingRunner {
    fn create_as(
        &self,
        uid: u32,
        gid: u32,
        controller: &str,
        cgroup: &str,
    ) -> Result<(), ChildProcessError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((uid, gid, controller.to_owned(), cgroup.to_owned()));
        if self.fail {
            return Err(ChildProcessError::ExitedNonZero { status: 1 });
        }
        Ok(())
    }
}

#[test]
fn create_is_delegated_to_the_runner() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let runner = RecordingRunner {
        calls: Arc::clone(&calls),
        fail: false,
    };
    let handle = ManagerHandle::with_runner("/run/never-used.sock", Box::new(runner));

    handle.create("freezer", "jobs/a", 1000, 1001).expect("create");

    let calls = calls.lock().expect("calls lock");
    assert_eq!(
        calls.as_slice(),
        &[(1000, 1001, "freezer".to_owned(), "jobs/a".to_owned())]
    );
}

#[test]
fn runner_failures_surface_as_call_failures() {
    let runner = RecordingRunner {
        calls: Arc::new(Mutex::new(Vec::new())),
        fail: true,
    };
    let handle = ManagerHandle::with_runner("/run/never-used.sock", Box::new(runner));

    let err = handle
        .create("freezer", "jobs/a", 1000, 1001)
        .expect_err("create failure");
    assert!(matches!(err, RpcError::CallFailed { method: "create", .. }));
}
