use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub executor: Executor,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub project_name: String,
    pub test_category: String,
    pub sw_version: String,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            project_name: "".into(),
            test_category: "Functional".into(),
            sw_version: "".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub reports_dir: String,
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            reports_dir: "reports".into(),
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub tests_dir: String,
    pub extensions: Vec<String>,
    pub class_prefix: String,
    pub include_builtin: bool,
}
impl Default for Discovery {
    fn default() -> Self {
        Self {
            tests_dir: "tests".into(),
            extensions: vec!["py".into()],
            class_prefix: "Test".into(),
            include_builtin: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executor {
    /// Program for external identifiers. `{target}`, `{module}`, `{entity}`
    /// and `{report}` are substituted in `args`.
    pub program: String,
    pub args: Vec<String>,
    pub input_env_var: String,
    /// 0 waits forever.
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Executor {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            args: vec![
                "-m".into(),
                "pytest".into(),
                "{target}".into(),
                "--html".into(),
                "{report}".into(),
                "--self-contained-html".into(),
            ],
            input_env_var: "USER_INPUT_FILE".into(),
            timeout_seconds: 0,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Runner {
    pub stop_on_executor_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_summary_html: bool,
    pub summary_filename: String,
    pub write_index_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_summary_html: true,
            summary_filename: "summary.html".into(),
            write_index_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_child_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_child_stderr: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub reject_url_inputs: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
        }
    }
}
