use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("evaveo");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }

    fn log_dir(&self) -> PathBuf {
        self.xdg_state.join("evaveo")
    }
}

fn run_cli(env: &CliTestEnv, args: &[&str]) -> Output {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin!("evaveo"));

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute evaveo {}: {e}", args.join(" ")))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "evaveo {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    );
}

#[test]
fn status_without_config_reports_not_ready() {
    let env = CliTestEnv::new();

    let output = run_cli(&env, &["status"]);
    assert_success(&["status"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("EVAVEO SDK Configuration"));
    assert!(stdout.contains("API Key:         <not set>"));
    assert!(stdout.contains("API URL:         https://api.vrmanager.evaveo.com/api/tracking"));
    assert!(stdout.contains("Status: Not ready"));
}

#[test]
fn status_masks_configured_key() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[sdk]
api_key = "vr_live_secret123"
api_url = "https://collector.example.com/api/tracking/"
app_name = "Safety Training"

[performance]
enabled = false
"#,
    );

    let output = run_cli(&env, &["status"]);
    assert_success(&["status"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("API Key:         vr_l********"));
    assert!(!stdout.contains("secret123"), "key leaked:\n{stdout}");
    assert!(stdout.contains("API URL:         https://collector.example.com/api/tracking\n"));
    assert!(stdout.contains("App Name:        Safety Training"));
    assert!(stdout.contains("Performance:     disabled"));
    assert!(stdout.contains("Status: Ready to track"));
}

#[test]
fn track_without_key_fails() {
    let env = CliTestEnv::new();

    let args = ["track", "module_started"];
    let output = run_cli(&env, &args);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SDK is not configured"), "stderr:\n{stderr}");
}

#[test]
fn track_rejects_malformed_payload_field() {
    let env = CliTestEnv::new();

    let args = ["--api-key", "vr_test", "track", "quiz", "-d", "novalue"];
    let output = run_cli(&env, &args);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected KEY=VALUE"), "stderr:\n{stderr}");
}

#[test]
fn track_against_unreachable_collector_reports_pending() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[delivery]
timeout_secs = 1

[performance]
enabled = false
"#,
    );

    let args = [
        "--api-key",
        "vr_test",
        "--api-url",
        "http://127.0.0.1:9/api/tracking",
        "track",
        "quiz_answered",
        "-d",
        "score=85",
        "--wait",
        "1",
    ];
    let output = run_cli(&env, &args);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("Delivery:"), "stdout:\n{stdout}");
    assert!(stderr.contains("events still pending"), "stderr:\n{stderr}");

    // The file log records the failed attempts
    let logs: Vec<_> = fs::read_dir(env.log_dir())
        .expect("log dir should exist")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("evaveo.log"))
        .collect();
    assert!(!logs.is_empty(), "expected a log file in {}", env.log_dir().display());
}
