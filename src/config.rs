//! Configuration loading and validation for labrun.
//!
//! The step's inputs come from environment variables (see [`schema::env`]);
//! the polling and reporting policy comes from an optional TOML settings
//! file. Both are read once at start and never change afterwards.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use tracing::info;

/// Errors raised while loading or validating configuration.
///
/// All of these abort the run before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required input was empty or unset.
    #[error("Issue with {field}: required variable `{var}` is empty")]
    Empty {
        field: &'static str,
        var: &'static str,
    },

    /// The test type is not one of the recognized values.
    #[error(
        "Issue with TestType: `{0}` is not one of: instrumentation, robo, gameloop"
    )]
    InvalidTestType(String),

    /// A declared artifact path does not exist.
    #[error("Issue with {field}: path does not exist: {}", .path.display())]
    PathNotFound { field: &'static str, path: PathBuf },

    /// The settings file could not be read.
    #[error("Failed to read settings file {}: {source}", .path.display())]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML or does not match the schema.
    #[error("Failed to parse settings{}: {source}", origin_suffix(.path))]
    ParseSettings {
        path: Option<PathBuf>,
        #[source]
        source: toml::de::Error,
    },
}

fn origin_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" file {}", p.display()))
        .unwrap_or_default()
}

impl StepConfig {
    /// Reads the step inputs from the process environment.
    ///
    /// Unset variables read as empty strings.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the step inputs through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use labrun::config::StepConfig;
    ///
    /// let vars = HashMap::from([("test_type", "robo")]);
    /// let config = StepConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
    /// assert_eq!(config.test_type, "robo");
    /// assert!(config.api_base_url.is_empty());
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).unwrap_or_default();

        Self {
            api_base_url: get(env::API_BASE_URL),
            build_slug: get(env::BUILD_SLUG),
            app_slug: get(env::APP_SLUG),

            apk_path: get(env::APK_PATH),
            test_apk_path: get(env::TEST_APK_PATH),
            test_type: get(env::TEST_TYPE),
            test_devices: get(env::TEST_DEVICES),
            app_package_id: get(env::APP_PACKAGE_ID),
            test_timeout: get(env::TEST_TIMEOUT),

            inst_test_package_id: get(env::INST_TEST_PACKAGE_ID),
            inst_test_runner_class: get(env::INST_TEST_RUNNER_CLASS),
            inst_test_targets: get(env::INST_TEST_TARGETS),

            robo_initial_activity: get(env::ROBO_INITIAL_ACTIVITY),
            robo_max_depth: get(env::ROBO_MAX_DEPTH),
            robo_max_steps: get(env::ROBO_MAX_STEPS),
            robo_directives: get(env::ROBO_DIRECTIVES),

            loop_scenarios: get(env::LOOP_SCENARIOS),
            loop_scenario_labels: get(env::LOOP_SCENARIO_LABELS),
        }
    }

    /// Checks the inputs the run cannot start without.
    ///
    /// Checks run in a fixed order and the first failure is returned:
    /// base URL, build slug, app slug, test type, app artifact, and for
    /// instrumentation runs the test artifact. Numeric fields are not checked
    /// here.
    pub fn validate(&self) -> Result<TestType, ConfigError> {
        require(&self.api_base_url, "APIBaseURL", env::API_BASE_URL)?;
        require(&self.build_slug, "BuildSlug", env::BUILD_SLUG)?;
        require(&self.app_slug, "AppSlug", env::APP_SLUG)?;
        require(&self.test_type, "TestType", env::TEST_TYPE)?;

        let test_type = self.parsed_test_type()?;

        require(&self.apk_path, "ApkPath", env::APK_PATH)?;
        require_path(&self.apk_path, "ApkPath")?;

        if test_type.requires_test_artifact() {
            require(&self.test_apk_path, "TestApkPath", env::TEST_APK_PATH)?;
            require_path(&self.test_apk_path, "TestApkPath")?;
        }

        Ok(test_type)
    }

    /// Parses the test type field.
    pub fn parsed_test_type(&self) -> Result<TestType, ConfigError> {
        self.test_type
            .parse()
            .map_err(ConfigError::InvalidTestType)
    }

    /// Logs the inputs at info level.
    pub fn log_summary(&self) {
        info!("Configs:");
        info!("- APIBaseURL: {}", self.api_base_url);
        info!("- BuildSlug: {}", self.build_slug);
        info!("- AppSlug: {}", self.app_slug);
        info!("- ApkPath: {}", self.apk_path);
        info!("- TestApkPath: {}", self.test_apk_path);
        info!("- TestType: {}", self.test_type);
        info!("- AppPackageID: {}", self.app_package_id);
        info!("- TestTimeout: {}", self.test_timeout);
        info!("- TestDevices:");
        for line in self.test_devices.lines().filter(|l| !l.trim().is_empty()) {
            info!("    {}", line.trim());
        }
    }
}

fn require(value: &str, field: &'static str, var: &'static str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty { field, var });
    }
    Ok(())
}

fn require_path(value: &str, field: &'static str) -> Result<(), ConfigError> {
    let path = Path::new(value);
    if !path.exists() {
        return Err(ConfigError::PathNotFound {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Loads settings from a TOML file.
///
/// When `required` is false a missing file yields the defaults; this is how
/// the default `labrun.toml` is treated when it was not named explicitly.
pub fn load_settings(path: &Path, required: bool) -> Result<Settings, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Settings::default());
        }
        Err(source) => {
            return Err(ConfigError::ReadSettings {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    toml::from_str(&content).map_err(|source| ConfigError::ParseSettings {
        path: Some(path.to_path_buf()),
        source,
    })
}

/// Loads settings from a TOML string.
///
/// # Example
///
/// ```
/// use labrun::config::{load_settings_str, ApiVersion};
///
/// let settings = load_settings_str(r#"
///     [poll]
///     api_version = "matrix"
///     interval_secs = 10
/// "#)?;
///
/// assert_eq!(settings.poll.api_version, ApiVersion::Matrix);
/// assert_eq!(settings.poll.grace_secs, 600);
/// # Ok::<(), labrun::config::ConfigError>(())
/// ```
pub fn load_settings_str(content: &str) -> Result<Settings, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::ParseSettings { path: None, source })
}
