use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Course identity and grading policy.
#[derive(Debug, Deserialize, Clone)]
pub struct CourseConfig {
    /// Course short name (e.g. "sdmm", "classytest"). Default: "sdmm".
    #[serde(default = "default_course_name")]
    pub name: String,
    /// Minimum overall score to pass a deliverable. Default: 60.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Prefix for provisioned repository names. Default: "secap_".
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
}

fn default_course_name() -> String {
    "sdmm".into()
}
fn default_pass_threshold() -> f64 {
    60.0
}
fn default_project_prefix() -> String {
    "secap_".into()
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            name: default_course_name(),
            pass_threshold: default_pass_threshold(),
            project_prefix: default_project_prefix(),
        }
    }
}

/// Source-hosting platform coordinates.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GithubConfig {
    /// Hostname of the platform (e.g. "github.example.edu").
    #[serde(default)]
    pub host: String,
    /// Organization the course repositories live in.
    #[serde(default)]
    pub org: String,
    /// Public URL of this service, used to build the webhook address.
    #[serde(default)]
    pub backend_url: String,
    /// Public port of this service.
    #[serde(default)]
    pub backend_port: u16,
}

impl GithubConfig {
    /// The webhook endpoint installed on every provisioned repository.
    pub fn webhook_url(&self) -> String {
        format!(
            "{}:{}/portal/githubWebhook",
            self.backend_url, self.backend_port
        )
    }
}

/// Container daemon endpoint. Without a host, the local socket is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DockerConfig {
    /// Remote daemon address. An `http`, `https` or `tcp` scheme selects TLS.
    pub host: Option<String>,
    /// Client certificate, required for TLS hosts.
    pub ssl_cert_path: Option<String>,
    /// Client key, required for TLS hosts.
    pub ssl_key_path: Option<String>,
}

impl DockerConfig {
    /// Whether the configured host requires a TLS connection.
    pub fn wants_tls(&self) -> bool {
        self.host
            .as_deref()
            .map(|h| {
                h.starts_with("http://") || h.starts_with("https://") || h.starts_with("tcp://")
            })
            .unwrap_or(false)
    }
}

/// Queue capacities for the three scheduler tiers.
#[derive(Debug, Deserialize, Clone)]
pub struct AutotestConfig {
    /// Concurrent slots for the express tier. Default: 1.
    #[serde(default = "default_slots_express")]
    pub slots_express: usize,
    /// Concurrent slots for the standard tier. Default: 2.
    #[serde(default = "default_slots_standard")]
    pub slots_standard: usize,
    /// Concurrent slots for the regression tier. Default: 1.
    #[serde(default = "default_slots_regression")]
    pub slots_regression: usize,
}

fn default_slots_express() -> usize {
    1
}
fn default_slots_standard() -> usize {
    2
}
fn default_slots_regression() -> usize {
    1
}

impl Default for AutotestConfig {
    fn default() -> Self {
        Self {
            slots_express: default_slots_express(),
            slots_standard: default_slots_standard(),
            slots_regression: default_slots_regression(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub course: CourseConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub autotest: AutotestConfig,
}

impl AppConfig {
    /// Load from `config/config.toml` with `AUTOGRADE__`-prefixed
    /// environment overrides (e.g. `AUTOGRADE__GITHUB__ORG`).
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config/config").required(false))
            .add_source(Environment::with_prefix("AUTOGRADE").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
