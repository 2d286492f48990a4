//! Exit code and console protocol tests for the `pipeliner` binary

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn pipeline_file(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, yaml).unwrap();
    path
}

fn pipeliner() -> Command {
    let mut cmd = Command::cargo_bin("pipeliner").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("PIPELINER_OUTPUT")
        .env_remove("PIPELINER_TIMESTAMPS");
    cmd
}

#[test]
fn test_success_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "ok.yaml",
        "pipeline:\n  name: Hello\n  jobs:\n    - steps:\n        - run: echo hi ${{ who }}\n",
    );

    pipeliner()
        .arg("run")
        .arg(&file)
        .args(["-P", "who=you"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@pipeline name=[Hello] status=[running]"))
        .stdout(predicate::str::contains("$ echo hi you"))
        .stdout(predicate::str::contains("> hi you"));
}

#[test]
fn test_failing_step_exit_code_is_returned() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "fail.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: exit 4\n        - run: echo never\n",
    );

    pipeliner()
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .code(predicate::eq(4))
        .stdout(predicate::str::contains("status=[skipped]"))
        .stdout(predicate::str::contains("> never").not());
}

#[test]
fn test_first_failing_file_stops_the_sequence() {
    let dir = TempDir::new().unwrap();
    let first = pipeline_file(
        &dir,
        "first.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: exit 3\n",
    );
    let second = pipeline_file(
        &dir,
        "second.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: echo second\n",
    );

    pipeliner()
        .arg("run")
        .arg(&first)
        .arg(&second)
        .assert()
        .code(predicate::eq(3))
        .stdout(predicate::str::contains("> second").not());
}

#[test]
fn test_definition_error_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(&dir, "empty.yaml", "pipeline:\n  jobs: []\n");

    pipeliner()
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .code(predicate::eq(65))
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_unbalanced_reference_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "broken.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: echo ${{ broken\n",
    );

    pipeliner()
        .arg("validate")
        .arg(&file)
        .assert()
        .failure()
        .code(predicate::eq(65));
}

#[test]
fn test_missing_file_exit_code() {
    pipeliner()
        .args(["run", "/no/such/pipeline.yaml"])
        .assert()
        .failure()
        .code(predicate::eq(65));
}

#[test]
fn test_validate_success() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "ok.yaml",
        "pipeline:\n  name: Build\n  jobs:\n    - steps:\n        - run: touch never-created\n",
    );

    pipeliner()
        .arg("validate")
        .arg(&file)
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok.yaml"));
    assert!(!dir.path().join("never-created").exists());
}

#[test]
fn test_json_output() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "ok.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: echo json\n",
    );

    let output = pipeliner()
        .arg("run")
        .arg(&file)
        .args(["--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(
        events
            .iter()
            .any(|e| e["event"] == "output" && e["line"] == "json")
    );
    assert_eq!(events.last().unwrap()["node"]["kind"], "pipeline");
    assert_eq!(events.last().unwrap()["status"], "success");
}

#[test]
fn test_environment_override() {
    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "env.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: echo $GREETING\n",
    );

    pipeliner()
        .arg("run")
        .arg(&file)
        .args(["-E", "GREETING=hola"])
        .assert()
        .success()
        .stdout(predicate::str::contains("> hola"));
}

#[cfg(unix)]
#[test]
fn test_non_utf8_environment_is_tolerated() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = TempDir::new().unwrap();
    let file = pipeline_file(
        &dir,
        "ok.yaml",
        "pipeline:\n  jobs:\n    - steps:\n        - run: echo still running\n",
    );

    pipeliner()
        .arg("run")
        .arg(&file)
        .env("BADVAR", OsStr::from_bytes(&[0xff, 0xfe]))
        .assert()
        .success()
        .stdout(predicate::str::contains("> still running"));
}

/// True while `pid` exists and is not a zombie
#[cfg(target_os = "linux")]
fn is_running(pid: i32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
        stat.rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            != Some('Z')
    })
}

#[cfg(target_os = "linux")]
#[test]
fn test_termination_signal_kills_child_and_removes_channels() {
    use std::time::{Duration, Instant};

    let dir = TempDir::new().unwrap();
    let channels = TempDir::new().unwrap();
    let pid_file = dir.path().join("pid");
    let file = pipeline_file(
        &dir,
        "slow.yaml",
        &format!(
            "pipeline:\n  jobs:\n    - steps:\n        - run: echo $$ > {}; exec sleep 313\n",
            pid_file.display()
        ),
    );

    let mut engine = pipeliner()
        .arg("run")
        .arg(&file)
        .env("TMPDIR", channels.path())
        .stdout(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let give_up = Instant::now() + Duration::from_secs(10);
    let child: i32 = loop {
        if let Some(pid) = fs::read_to_string(&pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            break pid;
        }
        assert!(Instant::now() < give_up, "step never started");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(is_running(child));
    assert_eq!(fs::read_dir(channels.path()).unwrap().count(), 2);

    let engine_pid = i32::try_from(engine.id()).unwrap();
    // SAFETY: plain kill(2) on the process we spawned.
    unsafe {
        libc::kill(engine_pid, libc::SIGTERM);
    }
    let status = engine.wait().unwrap();
    assert_eq!(status.code(), Some(130));

    let give_up = Instant::now() + Duration::from_secs(10);
    while is_running(child) && Instant::now() < give_up {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!is_running(child));
    assert_eq!(fs::read_dir(channels.path()).unwrap().count(), 0);
}

#[test]
fn test_invalid_property_argument() {
    pipeliner()
        .args(["run", "pipeline.yaml", "-P", "no-equals-sign"])
        .assert()
        .failure()
        .code(predicate::eq(2));
}

#[test]
fn test_no_subcommand() {
    pipeliner().assert().failure().code(predicate::eq(2));
}
