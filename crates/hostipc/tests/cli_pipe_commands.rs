#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use hostipc::pipe::PipeWriter;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/hostipc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn hostipc() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hostipc"));
    cmd.arg("--log-level").arg("error");
    cmd
}

#[test]
fn named_pipe_round_trip_between_processes() {
    let dir = unique_temp_dir("roundtrip");
    let fifo = dir.join("jobs.fifo");

    let receiver = hostipc()
        .arg("--format")
        .arg("json")
        .arg("recv")
        .arg(&fifo)
        .stdout(Stdio::piped())
        .spawn()
        .expect("recv should start");

    let sent = hostipc()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&fifo)
        .arg("u32:3")
        .arg("f64:0.5")
        .arg("str:Hello 5!")
        .output()
        .expect("send should run");
    assert!(sent.status.success(), "send failed: {sent:?}");
    let report: serde_json::Value =
        serde_json::from_slice(&sent.stdout).expect("send should emit json");
    assert_eq!(report["messages"], 3);

    let received = receiver.wait_with_output().expect("recv should finish");
    assert!(received.status.success());

    let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&received.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each message is one json line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["kind"], "u32");
    assert_eq!(lines[0]["value"], 3);
    assert_eq!(lines[1]["kind"], "f64");
    assert_eq!(lines[1]["value"], 0.5);
    assert_eq!(lines[2]["kind"], "str");
    assert_eq!(lines[2]["value"], "Hello 5!");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recv_rejects_unknown_tag() {
    let dir = unique_temp_dir("badtag");
    let fifo = dir.join("bad.fifo");
    let fifo_name = fifo.to_str().expect("temp path is utf-8").to_string();

    let receiver = hostipc()
        .arg("recv")
        .arg(&fifo)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("recv should start");

    let mut writer = PipeWriter::create_named(&fifo_name).expect("writer should open");
    writer.write_all(&[42, 0, 0, 0]).expect("write should succeed");
    writer.close();

    let output = receiver.wait_with_output().expect("recv should finish");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown message tag 42"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recv_reports_truncated_stream() {
    let dir = unique_temp_dir("truncated");
    let fifo = dir.join("short.fifo");
    let fifo_name = fifo.to_str().expect("temp path is utf-8").to_string();

    let receiver = hostipc()
        .arg("--format")
        .arg("raw")
        .arg("recv")
        .arg(&fifo)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("recv should start");

    let mut writer = PipeWriter::create_named(&fifo_name).expect("writer should open");
    // One complete u32 message, then half of a second tag.
    writer
        .write_all(&[1, 0, 0, 0, 7, 0, 0, 0, 1, 0])
        .expect("write should succeed");
    writer.close();

    let output = receiver.wait_with_output().expect("recv should finish");
    assert_eq!(output.status.code(), Some(60));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "7\n");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_rejects_invalid_pipe_name() {
    let output = hostipc()
        .arg("send")
        .arg("nested/name")
        .arg("u32:1")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_rejects_malformed_message() {
    let output = hostipc()
        .arg("send")
        .arg("whatever")
        .arg("i64:1")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(2));
}
