use std::path::{Path, PathBuf};
use std::process::Command;
use testdeck::{
    config::Config,
    executor::{process::ProcessExecutor, CancelToken, Executor},
    job::JobDescriptor,
};

const BIN: &str = env!("CARGO_BIN_EXE_testdeck");

fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p
}

#[test]
fn builtin_routine_runs_as_child_process() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write_csv(
        dir.path(),
        "bad.csv",
        "Name,Stock,Availability\nWidget,0,discontinued\n",
    );
    let good = write_csv(
        dir.path(),
        "good.csv",
        "Name,Stock,Availability\nGadget,5,discontinued\n",
    );
    let cfg = Config::default();
    let exec = ProcessExecutor::with_self_exe(&cfg, PathBuf::from(BIN));

    let bad_report = dir.path().join("r").join("01-bad.html");
    let done = exec
        .execute(
            &JobDescriptor::new(&bad, "builtin::TestAvailabilityStock"),
            &bad_report,
            &CancelToken::new(),
        )
        .unwrap();
    assert!(!done.success);
    assert!(std::fs::read_to_string(&bad_report)
        .unwrap()
        .contains("FAIL: Widget is discontinued but stock is 0"));

    let good_report = dir.path().join("r").join("02-good.html");
    let done = exec
        .execute(
            &JobDescriptor::new(&good, "builtin::TestAvailabilityStock"),
            &good_report,
            &CancelToken::new(),
        )
        .unwrap();
    assert!(done.success);
}

#[test]
fn run_command_writes_summary_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_csv(
        dir.path(),
        "A.csv",
        "Name,Stock,Availability\nWidget,0,discontinued\n",
    );
    let b = write_csv(
        dir.path(),
        "B.csv",
        "Name,Stock,Availability\nGadget,5,discontinued\n",
    );
    let out = dir.path().join("out");
    let config = dir.path().join("testdeck.toml");
    std::fs::write(
        &config,
        format!(
            "[paths]\nreports_dir = {:?}\nout_dir = {:?}\n",
            dir.path().join("reports").display().to_string(),
            out.display().to_string()
        ),
    )
    .unwrap();

    let output = Command::new(BIN)
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--job")
        .arg(format!("{}=builtin::TestAvailabilityStock", a.display()))
        .arg("--job")
        .arg(format!("{}=builtin::TestAvailabilityStock", b.display()))
        .args(["--project", "Shop", "--sw-version", "1.0"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let statuses: Vec<_> = summary["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["failed", "passed"]);

    let session_dir = PathBuf::from(summary["session_dir"].as_str().unwrap());
    let html = std::fs::read_to_string(session_dir.join("summary.html")).unwrap();
    assert!(html.contains("01-A.html"));
    assert!(html.contains("02-B.html"));
    assert!(html.find("01-A.html") < html.find("02-B.html"));
    assert!(session_dir.join("index.json").is_file());
}

#[test]
fn run_command_rejects_empty_selection() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("testdeck.toml");
    std::fs::write(
        &config,
        format!(
            "[paths]\nreports_dir = {:?}\nout_dir = {:?}\n",
            dir.path().join("reports").display().to_string(),
            dir.path().join("out").display().to_string()
        ),
    )
    .unwrap();

    let output = Command::new(BIN)
        .arg("--config")
        .arg(&config)
        .arg("run")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(!dir.path().join("out").exists());
}

#[test]
fn rejected_selection_leaves_no_session_directory() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let config = dir.path().join("testdeck.toml");
    std::fs::write(
        &config,
        format!(
            "[paths]\nreports_dir = {:?}\nout_dir = {:?}\n",
            dir.path().join("reports").display().to_string(),
            out.display().to_string()
        ),
    )
    .unwrap();

    let missing = dir.path().join("nope.csv");
    let output = Command::new(BIN)
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--job")
        .arg(format!("{}=builtin::TestAvailabilityStock", missing.display()))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("input does not exist"));
    assert!(!out.exists());
    assert!(!dir.path().join("reports").exists());
}
