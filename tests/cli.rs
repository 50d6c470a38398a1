use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use nos::relays::DEFAULT_RELAYS;
use nos::server::RelayServer;
use nos::Identity;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SEED_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

struct TestEnv {
    _tmp: TempDir,
    home: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let home = tmp.path().join("nos-home");
        Self { _tmp: tmp, home }
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("nos");
        cmd.env("NOS_HOME", &self.home).env_remove("RUST_LOG");
        cmd
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let out = self
            .cmd()
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        String::from_utf8(out).expect("utf8 stdout")
    }

    fn run_fail(&self, args: &[&str]) -> String {
        let out = self
            .cmd()
            .args(args)
            .assert()
            .failure()
            .get_output()
            .stderr
            .clone();
        String::from_utf8(out).expect("utf8 stderr")
    }

    /// Seed the store with a custom relay list, bypassing validation
    fn write_relays(&self, relays: &[&str]) {
        fs::create_dir_all(&self.home).expect("create home");
        let list = serde_json::to_string(relays).expect("encode list");
        let store = serde_json::json!({ "relay-list": list });
        fs::write(self.home.join("store.json"), store.to_string()).expect("write store");
    }
}

#[test]
fn relay_list_shows_defaults() {
    let env = TestEnv::new();
    let out = env.run_ok(&["relay", "list"]);

    assert!(out.contains("(Using default relays)"));
    for relay in DEFAULT_RELAYS {
        assert!(out.contains(relay), "missing {relay}");
    }
    assert!(!env.home.join("store.json").exists());
}

#[test]
fn relay_without_action_lists() {
    let env = TestEnv::new();
    let out = env.run_ok(&["relay"]);
    assert!(out.contains("Current Relay List"));
}

#[test]
fn relay_add_rejects_unsupported_scheme() {
    let env = TestEnv::new();
    let err = env.run_fail(&["relay", "add", "ftp://x"]);

    assert!(err.contains("wss://"));
    assert!(env.run_ok(&["relay", "list"]).contains("(Using default relays)"));
}

#[test]
fn relay_add_twice_reports_already_present() {
    let env = TestEnv::new();

    let first = env.run_ok(&["relay", "add", "wss://relay.example.org"]);
    assert!(first.contains("Added relay"));

    let second = env.run_ok(&["relay", "add", "wss://relay.example.org"]);
    assert!(second.contains("already in list"));

    let list = env.run_ok(&["relay", "list"]);
    assert!(!list.contains("(Using default relays)"));
    assert_eq!(list.matches("wss://relay.example.org").count(), 1);
    assert!(list.contains(&format!("{}. wss://relay.example.org", DEFAULT_RELAYS.len() + 1)));
}

#[test]
fn relay_remove_without_custom_list_fails() {
    let env = TestEnv::new();
    let err = env.run_fail(&["relay", "remove", DEFAULT_RELAYS[0]]);
    assert!(err.contains("not found"));
}

#[test]
fn relay_remove_last_entry_fails_and_keeps_it() {
    let env = TestEnv::new();
    env.write_relays(&["wss://only.example"]);

    let err = env.run_fail(&["relay", "remove", "wss://only.example"]);
    assert!(err.contains("last relay"));
    assert!(env.run_ok(&["relay", "list"]).contains("1. wss://only.example"));
}

#[test]
fn relay_remove_and_reset() {
    let env = TestEnv::new();
    env.write_relays(&["wss://a.example", "wss://b.example"]);

    let out = env.run_ok(&["relay", "remove", "wss://a.example"]);
    assert!(out.contains("Removed relay"));
    let list = env.run_ok(&["relay", "list"]);
    assert!(!list.contains("wss://a.example"));
    assert!(list.contains("1. wss://b.example"));

    env.run_ok(&["relay", "reset"]);
    assert!(env.run_ok(&["relay", "list"]).contains("(Using default relays)"));

    // Resetting again is harmless
    env.run_ok(&["relay", "reset"]);
}

#[test]
fn key_generate_then_show() {
    let env = TestEnv::new();
    let generated = env.run_ok(&["key", "generate"]);
    let shown = env.run_ok(&["key", "show"]);

    let pubkey = shown.lines().last().expect("public key line").trim();
    assert_eq!(pubkey.len(), 64);
    assert!(generated.contains(pubkey));

    let err = env.run_fail(&["key", "generate"]);
    assert!(err.contains("--force"));
    env.run_ok(&["key", "generate", "--force"]);
    assert!(!env.run_ok(&["key", "show"]).contains(pubkey));
}

#[test]
fn key_import_reads_stdin() {
    let env = TestEnv::new();
    env.cmd()
        .args(["key", "import"])
        .write_stdin(format!("{SEED_HEX}\n"))
        .assert()
        .success();

    let expected = Identity::from_secret_hex(SEED_HEX).unwrap().public_key().to_hex();
    assert!(env.run_ok(&["key", "show"]).contains(&expected));
}

#[test]
fn key_import_rejects_garbage() {
    let env = TestEnv::new();
    env.cmd()
        .args(["key", "import"])
        .write_stdin("not-a-key\n")
        .assert()
        .failure();
    assert!(env.run_fail(&["key", "show"]).contains("No key configured"));
}

#[test]
fn verify_without_key_fails() {
    let env = TestEnv::new();
    let err = env.run_fail(&["verify"]);
    assert!(err.contains("No key configured"));
}

#[test]
fn publish_without_key_fails() {
    let env = TestEnv::new();
    let err = env.run_fail(&["hello", "world"]);
    assert!(err.contains("nos key generate"));
}

#[test]
fn no_message_prints_usage_and_fails() {
    let env = TestEnv::new();
    let out = env.cmd().assert().failure().get_output().stdout.clone();
    assert!(String::from_utf8_lossy(&out).contains("Usage"));
}

#[test]
fn publish_to_unreachable_relay_fails() {
    let env = TestEnv::new();
    env.write_relays(&["ws://127.0.0.1:1"]);
    env.run_ok(&["key", "generate"]);

    let out = env
        .cmd()
        .args(["--connect-timeout", "2000", "post", "hello"])
        .assert()
        .failure()
        .get_output()
        .clone();

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stdout.contains("Content: hello"));
    assert!(stdout.contains("ws://127.0.0.1:1 (connection failed"));
    assert!(stderr.contains("Failed to publish to any relay"));
}

#[test]
fn publish_degraded_when_one_relay_accepts() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let server = RelayServer::new();
    let relay_url = rt.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay");
        let addr = listener.local_addr().expect("relay addr");
        tokio::spawn(server.clone().serve(listener));
        format!("ws://{addr}")
    });

    let env = TestEnv::new();
    env.write_relays(&[&relay_url, "ws://127.0.0.1:1"]);
    env.cmd()
        .args(["key", "import"])
        .write_stdin(format!("{SEED_HEX}\n"))
        .assert()
        .success();

    let out = env.run_ok(&["--connect-timeout", "2000", "hello"]);

    assert!(out.contains(&format!("✓ {relay_url} published")));
    assert!(out.contains("Failed relays:"));
    assert!(out.contains("  - ws://127.0.0.1:1 (connection failed"));
    assert!(out.contains("Successfully published to 1/2 relays"));
    assert_eq!(rt.block_on(server.stored_events()).len(), 1);
}

#[test]
fn reset_yes_clears_key_and_relays() {
    let env = TestEnv::new();
    env.run_ok(&["relay", "add", "wss://relay.example.org"]);
    env.run_ok(&["key", "generate"]);

    let out = env.run_ok(&["reset", "--yes"]);
    assert!(out.contains("All data has been reset"));
    assert!(env.run_ok(&["relay", "list"]).contains("(Using default relays)"));
    assert!(env.run_fail(&["key", "show"]).contains("No key configured"));

    let again = env.run_ok(&["reset", "--yes"]);
    assert!(again.contains("No stored data found"));
}

#[test]
fn reset_asks_for_confirmation() {
    let env = TestEnv::new();
    env.run_ok(&["key", "generate"]);

    let out = env
        .cmd()
        .arg("reset")
        .write_stdin("n\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&out).contains("Reset cancelled"));
    env.run_ok(&["key", "show"]);
}
