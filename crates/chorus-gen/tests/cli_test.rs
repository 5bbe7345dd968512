use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn chorus_cmd() -> Command {
    let mut cmd = Command::cargo_bin("chorus-gen").unwrap();
    cmd.env_remove("CHORUS_CONFIG")
        .env_remove("CHORUS_BACKEND")
        .env_remove("CHORUS_PROMPTS")
        .env_remove("CHORUS_OUTPUT_ROOT")
        .env("RUST_LOG", "info");
    cmd
}

/// Short tone the fake synthesiser copies for every prompt
fn write_fixture(path: &Path, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(sample_rate / 10) {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Prompt table, fixture and a config with one in-process `/bin/sh`
    /// backend (`fast`) and one isolated copy of it (`remote`)
    fn new(prompts: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let mut csv = String::from("id,text\n");
        for (i, text) in prompts.iter().enumerate() {
            csv.push_str(&format!("{},\"{}\"\n", i, text));
        }
        fs::write(root.join("prompts.csv"), csv).unwrap();
        write_fixture(&root.join("fixture.wav"), 16_000);

        let engine = format!(
            r#"    engine:
      kind: command
      program: /bin/sh
      args: ["-c", "cp '{}' \"$1\"", "synth", "{{output}}"]"#,
            root.join("fixture.wav").display()
        );
        let config = format!(
            "prompts:\n  path: {prompts}\noutput_root: {out}\nbackends:\n  - name: fast\n    sample_rate: 16000\n{engine}\n  - name: remote\n    sample_rate: 16000\n{engine}\n    isolation:\n      mode: subprocess\n",
            prompts = root.join("prompts.csv").display(),
            out = root.join("out").display(),
            engine = engine,
        );
        fs::write(root.join("chorus.yaml"), config).unwrap();

        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn config(&self) -> String {
        self.path("chorus.yaml").display().to_string()
    }
}

mod run {
    use super::*;

    #[test]
    fn generates_every_backend_and_writes_report() {
        let ws = Workspace::new(&["Hello world.", "This is a test."]);

        chorus_cmd()
            .args(["run", "--config", &ws.config(), "--report"])
            .arg(ws.path("report.json"))
            .assert()
            .success();

        for rel in [
            "out/fast/sample_0.wav",
            "out/fast/sample_1.wav",
            "out/remote/sample_0.wav",
            "out/remote/sample_1.wav",
        ] {
            assert!(ws.path(rel).is_file(), "missing {}", rel);
        }

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.path("report.json")).unwrap()).unwrap();
        assert_eq!(report["prompt_count"], 2);
        assert_eq!(report["backends"][0]["backend"], "fast");
        assert_eq!(report["backends"][0]["counts"]["generated"], 2);
        assert_eq!(report["backends"][1]["isolated"], true);
        assert_eq!(report["backends"][1]["status"]["state"], "completed");
        assert!(report["backends"][1]["counts"].is_null());
    }

    #[test]
    fn rerun_skips_existing_outputs() {
        let ws = Workspace::new(&["Hello world.", "This is a test."]);
        chorus_cmd()
            .args(["--config", &ws.config()])
            .assert()
            .success();
        fs::remove_file(ws.path("out/fast/sample_1.wav")).unwrap();

        chorus_cmd()
            .args(["run", "--config", &ws.config(), "--backend", "fast", "--report"])
            .arg(ws.path("report.json"))
            .assert()
            .success();

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.path("report.json")).unwrap()).unwrap();
        assert_eq!(report["backends"].as_array().unwrap().len(), 1);
        assert_eq!(report["backends"][0]["counts"]["generated"], 1);
        assert_eq!(report["backends"][0]["counts"]["skipped"], 1);
    }

    #[test]
    fn debug_log_shows_per_prompt_progress() {
        let ws = Workspace::new(&["Hello world.", "This is a test."]);
        chorus_cmd()
            .args(["run", "--config", &ws.config(), "--backend", "fast"])
            .env("RUST_LOG", "debug")
            .assert()
            .success()
            .stderr(predicate::str::contains("fast: [1/2] generated"))
            .stderr(predicate::str::contains("fast: [2/2] generated"))
            .stderr(predicate::str::contains("s of audio)"));
    }

    #[test]
    fn missing_prompt_file_is_fatal() {
        let ws = Workspace::new(&["Hello world."]);
        fs::remove_file(ws.path("prompts.csv")).unwrap();

        chorus_cmd()
            .args(["run", "--config", &ws.config()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Prompt source unavailable"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let ws = Workspace::new(&["Hello world."]);
        chorus_cmd()
            .args(["run", "--config", &ws.config(), "--backend", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown backend"));
    }

    #[test]
    fn backend_failure_still_exits_zero() {
        let ws = Workspace::new(&["Hello world."]);
        let broken = fs::read_to_string(ws.path("chorus.yaml"))
            .unwrap()
            .replacen("program: /bin/sh", "program: /definitely/not/a/synth", 1);
        fs::write(ws.path("chorus.yaml"), broken).unwrap();

        chorus_cmd()
            .args(["run", "--config", &ws.config()])
            .assert()
            .success()
            .stderr(predicate::str::contains("fast: backend failed"));
        assert!(ws.path("out/remote/sample_0.wav").is_file());
    }
}

mod worker {
    use super::*;

    #[test]
    fn runs_one_backend_from_environment() {
        let ws = Workspace::new(&["Hello world."]);
        chorus_cmd()
            .arg("worker")
            .env("CHORUS_CONFIG", ws.config())
            .env("CHORUS_BACKEND", "fast")
            .env("CHORUS_PROMPTS", ws.path("prompts.csv"))
            .env("CHORUS_OUTPUT_ROOT", ws.path("elsewhere"))
            .assert()
            .success();
        assert!(ws.path("elsewhere/fast/sample_0.wav").is_file());
        assert!(!ws.path("out/fast").exists());
    }

    #[test]
    fn missing_prompts_exit_code() {
        let ws = Workspace::new(&["Hello world."]);
        chorus_cmd()
            .args(["worker", "--config", &ws.config(), "--backend", "fast", "--prompts"])
            .arg(ws.path("missing.csv"))
            .assert()
            .code(2);
    }

    #[test]
    fn unknown_backend_exit_code() {
        let ws = Workspace::new(&["Hello world."]);
        chorus_cmd()
            .args(["worker", "--config", &ws.config(), "--backend", "nope"])
            .assert()
            .code(3);
    }
}

mod status {
    use super::*;

    #[test]
    fn reports_completed_counts() {
        let ws = Workspace::new(&["one", "two", "three"]);
        chorus_cmd()
            .args(["run", "--config", &ws.config(), "--backend", "fast"])
            .assert()
            .success();

        chorus_cmd()
            .args(["status", "--config", &ws.config()])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"fast\s+3/3").unwrap())
            .stdout(predicate::str::is_match(r"remote\s+0/3  \(isolated\)").unwrap());
    }
}

mod init_config {
    use super::*;

    #[test]
    fn writes_defaults_and_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/chorus.yaml");

        chorus_cmd()
            .args(["init-config", "--path"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote default configuration"));
        let yaml = fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("qwen3"));
        assert!(yaml.contains("max_prompts: 500"));

        chorus_cmd()
            .args(["init-config", "--path"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));

        chorus_cmd()
            .args(["init-config", "--force", "--path"])
            .arg(&path)
            .assert()
            .success();
    }
}
