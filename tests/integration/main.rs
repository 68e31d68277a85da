//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use kiln::lock::checksum_of;
    use predicates::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn kiln() -> Command {
        cargo_bin_cmd!("kiln")
    }

    struct Project {
        _temp: TempDir,
        dir: PathBuf,
    }

    /// A complete project: source, tests, lock artifact, package index,
    /// and a kiln.toml keeping the cache inside the tempdir.
    fn scaffold() -> Project {
        scaffold_with_gates("true", "true", "test -f tests/test_main.py")
    }

    fn scaffold_with_gates(lint: &str, typecheck: &str, test: &str) -> Project {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("project");
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::create_dir_all(dir.join("tests")).unwrap();
        std::fs::write(dir.join("src/main.py"), b"print('hello')").unwrap();
        std::fs::write(dir.join("tests/test_main.py"), b"assert True").unwrap();

        let index = dir.join("index");
        std::fs::create_dir_all(&index).unwrap();
        std::fs::write(index.join("flask-3.0.0.pkg"), b"web").unwrap();
        std::fs::write(index.join("pytest-8.1.0.pkg"), b"tests").unwrap();

        let lock = format!(
            "version = 1\n\n\
             [[package]]\nname = \"flask\"\nversion = \"3.0.0\"\nchecksum = \"{}\"\nscope = \"production\"\n\n\
             [[package]]\nname = \"pytest\"\nversion = \"8.1.0\"\nchecksum = \"{}\"\nscope = \"development\"\n",
            checksum_of(b"web"),
            checksum_of(b"tests"),
        );
        std::fs::write(dir.join("deps.lock"), lock).unwrap();

        let config = format!(
            r#"
[project]
name = "demo"

[cache]
dir = "{cache}"

[stages.builder]
kind = "build"
base = "python:3.12-slim"

[stages.test]
kind = "test"
parent = "builder"
gates = {{ lint = "{lint}", typecheck = "{typecheck}", test = "{test}" }}

[stages.development]
kind = "development"
parent = "builder"
privileged = true

[stages.production]
kind = "production"
base = "python:3.12-alpine"
copy_from = "builder"
user = "app"
entrypoint = ["python", "-m", "app"]
port = 8000
"#,
            cache = temp.path().join("cache").display(),
            lint = lint,
            typecheck = typecheck,
            test = test,
        );
        std::fs::write(dir.join("kiln.toml"), config).unwrap();

        Project { _temp: temp, dir }
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Multi-stage container build pipeline"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn build_without_config_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        kiln()
            .current_dir(temp.path())
            .args(["build", "builder"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("kiln init"));
    }

    #[test]
    fn init_creates_config() {
        let temp = TempDir::new().unwrap();

        kiln()
            .args(["init", "--path"])
            .arg(temp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline initialized"));
        assert!(temp.path().join("kiln.toml").exists());

        // Second run refuses without --force
        kiln()
            .args(["init", "--path"])
            .arg(temp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        kiln()
            .args(["init", "--force", "--path"])
            .arg(temp.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline initialized"));
    }

    #[test]
    fn plan_shows_dependency_order() {
        let project = scaffold();
        kiln()
            .current_dir(&project.dir)
            .args(["plan", "test"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1. builder"))
            .stdout(predicate::str::contains("2. test"));
    }

    #[test]
    fn plan_unknown_stage_fails() {
        let project = scaffold();
        kiln()
            .current_dir(&project.dir)
            .args(["plan", "release"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stage not found"));
    }

    #[test]
    fn production_build_produces_isolated_image() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "production"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Build complete"));

        let image_dir = project.dir.join(".kiln/images/production");
        let containerfile = std::fs::read_to_string(image_dir.join("Containerfile")).unwrap();
        assert!(containerfile.contains("FROM python:3.12-alpine"));
        assert!(containerfile.contains("USER app"));
        assert!(containerfile.contains("EXPOSE 8000"));
        assert!(containerfile.contains("HEALTHCHECK"));
        assert!(containerfile.contains("http://localhost:8000/health"));
        assert!(containerfile.contains("ENTRYPOINT [\"python\",\"-m\",\"app\"]"));

        // Runtime rootfs carries source and packages, never test inputs
        assert!(image_dir.join("rootfs/app/src/main.py").exists());
        assert!(image_dir
            .join("rootfs/opt/kiln/packages/flask-3.0.0.pkg")
            .exists());
        assert!(!image_dir.join("rootfs/app/tests").exists());
        assert!(!image_dir
            .join("rootfs/opt/kiln/packages/pytest-8.1.0.pkg")
            .exists());

        assert!(project.dir.join(".kiln/artifacts/production.json").exists());
    }

    #[test]
    fn unchanged_rebuild_replays_from_cache() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "production"])
            .assert()
            .success();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "production"])
            .assert()
            .success()
            .stdout(predicate::str::contains("all stages from cache"));
    }

    #[test]
    fn source_change_keeps_dependency_layers_cached() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .success();

        std::fs::write(project.dir.join("src/main.py"), b"print('v2')").unwrap();
        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2/4 steps cached"));
    }

    #[test]
    fn no_cache_flag_reexecutes_everything() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .success();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder", "--no-cache"])
            .assert()
            .success()
            .stdout(predicate::str::contains("0/4 steps cached"));
    }

    #[test]
    fn lint_failure_stops_pipeline_before_later_gates() {
        let project = scaffold_with_gates(
            "echo 'E501 line too long' >&2; exit 1",
            "touch typecheck-ran",
            "true",
        );

        kiln()
            .current_dir(&project.dir)
            .args(["build", "test"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stage 'test' failed at step 'gates'"))
            .stderr(predicate::str::contains("Gate 'lint' failed"))
            .stderr(predicate::str::contains("E501"));

        // Typecheck never ran after the lint failure
        let workspace = project.dir.join(".kiln/stages/test/app");
        assert!(!workspace.join("typecheck-ran").exists());
    }

    #[test]
    fn checksum_mismatch_fails_with_lock_hint() {
        let project = scaffold();
        std::fs::write(project.dir.join("index/flask-3.0.0.pkg"), b"tampered").unwrap();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Checksum mismatch"))
            .stderr(predicate::str::contains("Regenerate the lock artifact"));
    }

    #[test]
    fn missing_payload_fails_with_retry_hint() {
        let project = scaffold();
        std::fs::remove_file(project.dir.join("index/flask-3.0.0.pkg")).unwrap();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("install-deps"))
            .stderr(predicate::str::contains("re-run the build"));
    }

    #[test]
    fn build_arg_redirects_package_index() {
        let project = scaffold();
        std::fs::remove_file(project.dir.join("index/flask-3.0.0.pkg")).unwrap();

        let alternate = project.dir.join("alt-index");
        std::fs::create_dir_all(&alternate).unwrap();
        std::fs::write(alternate.join("flask-3.0.0.pkg"), b"web").unwrap();
        std::fs::write(alternate.join("pytest-8.1.0.pkg"), b"tests").unwrap();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder", "--build-arg"])
            .arg(format!("index={}", alternate.display()))
            .assert()
            .success();
    }

    #[test]
    fn cache_list_and_clear() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "builder"])
            .assert()
            .success();

        kiln()
            .current_dir(&project.dir)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cached layers"));

        kiln()
            .current_dir(&project.dir)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 4 cached layers"));

        kiln()
            .current_dir(&project.dir)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache is empty"));
    }

    #[test]
    fn artifacts_lists_recorded_builds() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "production"])
            .assert()
            .success();

        kiln()
            .current_dir(&project.dir)
            .args(["artifacts"])
            .assert()
            .success()
            .stdout(predicate::str::contains("production"))
            .stdout(predicate::str::contains("port 8000"))
            .stdout(predicate::str::contains("user app"));

        let json_out = kiln()
            .current_dir(&project.dir)
            .args(["artifacts", "--format", "json"])
            .assert()
            .success();
        let artifacts: serde_json::Value =
            serde_json::from_slice(&json_out.get_output().stdout).unwrap();
        let entries = artifacts.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|a| a["stage"] == "production" && a["runtime"]["health"]["path"] == "/health"));
    }

    #[test]
    fn config_show_and_path() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[project]"))
            .stdout(predicate::str::contains("[stages.production]"));

        kiln()
            .current_dir(&project.dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln.toml"));
    }

    #[test]
    fn project_flag_env_var_selects_project() {
        let project = scaffold();

        kiln()
            .env("KILN_PROJECT", &project.dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln.toml"));
    }

    #[test]
    fn config_discovered_from_subdirectory() {
        let project = scaffold();
        let nested = project.dir.join("src");

        kiln()
            .current_dir(&nested)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln.toml"));
    }

    #[test]
    fn unknown_target_stage_fails() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "release"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stage not found: release"));
    }

    #[test]
    fn build_all_covers_every_stage() {
        let project = scaffold();

        kiln()
            .current_dir(&project.dir)
            .args(["build", "--all"])
            .assert()
            .success()
            .stdout(predicate::str::contains("builder"))
            .stdout(predicate::str::contains("development"))
            .stdout(predicate::str::contains("production"));

        for stage in ["builder", "test", "development", "production"] {
            assert!(
                project
                    .dir
                    .join(format!(".kiln/artifacts/{}.json", stage))
                    .exists(),
                "missing artifact for {}",
                stage
            );
        }
    }
}
