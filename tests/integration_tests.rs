//! Integration tests for the sandforge CLI
//!
//! The offline commands (classify, context, deps, parse, config) run end to
//! end; `run` is exercised through the library tests with a mock provider.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn sandforge() -> Command {
    cargo_bin_cmd!("sandforge")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// A small React project on disk.
fn create_react_project(dir: &TempDir) {
    let root = dir.path();
    fs::create_dir_all(root.join("src/components")).unwrap();
    fs::write(
        root.join("package.json"),
        r#"{"name": "demo", "dependencies": {"react": "^18.2.0"}}"#,
    )
    .unwrap();
    fs::write(
        root.join("src/main.jsx"),
        "import React from 'react';\nimport App from './App';\n",
    )
    .unwrap();
    fs::write(
        root.join("src/App.jsx"),
        "import Header from './components/Header';\nexport default function App() { return <Header />; }\n",
    )
    .unwrap();
    fs::write(
        root.join("src/components/Header.jsx"),
        "export default function Header() { return <header>Demo</header>; }\n",
    )
    .unwrap();
    fs::write(root.join("src/index.css"), "body { margin: 0; }\n").unwrap();
}

const TRANSCRIPT: &str = r#"<thinking>Add a header and wire it into the app.</thinking>
I'll add an animated header.
<file path="src/components/Header.jsx">
import { motion } from 'framer-motion';
export default function Header() { return <motion.header>Hi</motion.header>; }
</file>
<file path="src/App.jsx">
import Header from './components/Header';
export default function App() { return <Header />; }
</file>
Done.
"#;

mod cli_basics {
    use super::*;

    #[test]
    fn test_sandforge_help() {
        sandforge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("classify"))
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_sandforge_version() {
        sandforge().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        sandforge().arg("frobnicate").assert().failure();
    }
}

mod classify {
    use super::*;

    #[test]
    fn test_classify_login_form() {
        let dir = create_temp_project();
        let output = sandforge()
            .current_dir(dir.path())
            .args(["classify", "add a login form"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(json["type"], "interactive-element");
        assert!(json["confidence"].as_f64().unwrap() >= 0.3);
    }

    #[test]
    fn test_classify_unmatched_prompt_falls_back() {
        let dir = create_temp_project();
        sandforge()
            .current_dir(dir.path())
            .args(["classify", "qwzx"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"complete-build\""));
    }
}

mod context {
    use super::*;

    #[test]
    fn test_context_selects_named_component() {
        let dir = create_temp_project();
        create_react_project(&dir);

        let output = sandforge()
            .current_dir(dir.path())
            .args(["context", "make the header background blue"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
        let primary: Vec<String> = serde_json::from_value(json["primary_files"].clone()).unwrap();
        let context: Vec<String> = serde_json::from_value(json["context_files"].clone()).unwrap();

        assert!(primary.contains(&"src/components/Header.jsx".to_string()));
        assert!(!context.contains(&"src/components/Header.jsx".to_string()));
    }

    #[test]
    fn test_context_with_manifest_dir() {
        let config_dir = create_temp_project();
        let project = create_temp_project();
        create_react_project(&project);

        sandforge()
            .current_dir(config_dir.path())
            .args(["context", "change the header text", "--manifest-dir"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("src/components/Header.jsx"));
    }
}

mod deps {
    use super::*;

    #[test]
    fn test_deps_from_file() {
        let dir = create_temp_project();
        let file = dir.path().join("Chart.jsx");
        fs::write(
            &file,
            "import React from 'react';\nimport { LineChart } from 'recharts';\nimport fs from 'fs';\nimport util from './util';\n",
        )
        .unwrap();

        sandforge()
            .arg("deps")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("recharts"))
            .stdout(predicate::str::contains("react\n"))
            .stdout(predicate::str::contains("fs").not())
            .stdout(predicate::str::contains("util").not());
    }

    #[test]
    fn test_deps_skips_installed() {
        let dir = create_temp_project();
        let file = dir.path().join("App.jsx");
        fs::write(
            &file,
            "import React from 'react';\nimport { motion } from 'framer-motion';\n",
        )
        .unwrap();

        sandforge()
            .arg("deps")
            .arg(&file)
            .args(["--installed", "react"])
            .assert()
            .success()
            .stdout("framer-motion\n");
    }

    #[test]
    fn test_deps_from_stdin_transcript() {
        sandforge()
            .args(["deps", "--installed", "react"])
            .write_stdin(TRANSCRIPT)
            .assert()
            .success()
            .stdout("framer-motion\n");
    }

    #[test]
    fn test_deps_from_stdin_plain_source() {
        sandforge()
            .arg("deps")
            .write_stdin("import axios from 'axios';\nimport { z } from 'zod';\n")
            .assert()
            .success()
            .stdout(predicate::str::contains("axios"))
            .stdout(predicate::str::contains("zod"));
    }
}

mod parse {
    use super::*;

    fn event_types(stdout: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(stdout)
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_parse_stdin_emits_files_then_done() {
        let output = sandforge()
            .args(["parse", "--chunk-size", "7"])
            .write_stdin(TRANSCRIPT)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let types = event_types(&output);
        assert_eq!(
            types.iter().filter(|t| *t == "file_complete").count(),
            2
        );
        assert_eq!(types.last().map(String::as_str), Some("done"));
        assert!(types.contains(&"thinking".to_string()));
        assert!(!types.contains(&"raw_chunk".to_string()));
    }

    #[test]
    fn test_parse_raw_includes_chunks() {
        let dir = create_temp_project();
        let file = dir.path().join("transcript.txt");
        fs::write(&file, TRANSCRIPT).unwrap();

        sandforge()
            .arg("parse")
            .arg(&file)
            .arg("--raw")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"raw_chunk\""))
            .stdout(predicate::str::contains("src/components/Header.jsx"));
    }

    #[test]
    fn test_parse_missing_file_fails() {
        sandforge()
            .args(["parse", "/nonexistent/transcript.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();

        sandforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created sandforge.toml"));

        let path = dir.path().join(".sandforge/sandforge.toml");
        assert!(path.exists());
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[classifier]"));
        assert!(content.contains("[sandbox]"));
    }

    #[test]
    fn test_config_init_twice_reports_existing() {
        let dir = create_temp_project();
        sandforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success();

        sandforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = create_temp_project();
        sandforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".sandforge")).unwrap();
        fs::write(
            dir.path().join(".sandforge/sandforge.toml"),
            "[classifier]\nmin_confidence = 1.5\n\n[retry]\nmax_attempts = 0\n",
        )
        .unwrap();

        sandforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings:"))
            .stdout(predicate::str::contains("min_confidence"))
            .stdout(predicate::str::contains("max_attempts"));
    }

    #[test]
    fn test_config_show_effective_generator() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".sandforge")).unwrap();
        fs::write(
            dir.path().join(".sandforge/sandforge.toml"),
            "[generation]\ncommand = \"my-gen\"\nargs = [\"--fast\"]\n",
        )
        .unwrap();

        sandforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .env_remove("SANDFORGE_GENERATOR_CMD")
            .assert()
            .success()
            .stdout(predicate::str::contains("command = \"my-gen\""))
            .stdout(predicate::str::contains("generator = \"my-gen\""));
    }

    #[test]
    fn test_config_invalid_toml_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".sandforge")).unwrap();
        fs::write(dir.path().join(".sandforge/sandforge.toml"), "[classifier\n").unwrap();

        sandforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure();
    }
}
