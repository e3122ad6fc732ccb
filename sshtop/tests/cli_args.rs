//! CLI tests for the sshtop binary.
use assert_cmd::Command;

#[test]
fn help_lists_every_flag() {
    let out = Command::cargo_bin("sshtop")
        .unwrap()
        .arg("--help")
        .output()
        .expect("run sshtop --help");
    assert!(out.status.success());
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(text.contains("Usage:"));
    for flag in ["--config", "-c", "--demo", "--json", "--ticks", "--log-file"] {
        assert!(text.contains(flag), "help text missing {flag}\n{text}");
    }
}

#[test]
fn demo_json_prints_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("sshtop.log");
    let out = Command::cargo_bin("sshtop")
        .unwrap()
        .args(["--demo", "--json", "--ticks", "2", "--log-file"])
        .arg(&log)
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .expect("run sshtop --demo --json");
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    // the first line may be written before the targets are registered
    let snap: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    let names: Vec<&str> = snap["targets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, ["demo-db", "demo-offline", "demo-web"]);
    // logs go to the file, never to the terminal
    assert!(std::fs::read_to_string(&log).unwrap().contains("starting"));
}

#[test]
fn invalid_config_aborts_startup_naming_server_and_field() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("config.yaml");
    std::fs::write(
        &cfg,
        "servers:\n  - {name: a, host: h, username: '9bad', key_path: k}\n",
    )
    .unwrap();
    let out = Command::cargo_bin("sshtop")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .arg("--log-file")
        .arg(dir.path().join("sshtop.log"))
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .expect("run sshtop");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("server 'a'"), "{stderr}");
    assert!(stderr.contains("username"), "{stderr}");
}
