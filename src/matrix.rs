//! Test-matrix document construction.
//!
//! [`build_matrix`] turns the flat step inputs into the nested document the
//! remote service accepts:
//!
//! ```text
//! TestMatrix
//! ├── environmentMatrix.androidDeviceList.androidDevices[]  (one per device line)
//! └── testSpecification
//!     ├── androidInstrumentationTest | androidRoboTest | androidTestLoop  (exactly one)
//!     └── testTimeout  ("{seconds}s")
//! ```
//!
//! The transform is pure: identical inputs produce byte-identical JSON.

use serde::{Deserialize, Serialize};

use crate::config::{StepConfig, TestType};

/// Errors raised while parsing list and numeric inputs into the document.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// A device line did not have exactly four fields.
    #[error("Invalid test device configuration: {0}")]
    InvalidDevice(String),

    /// A robo directive line did not have exactly three fields.
    #[error("Invalid directive configuration: {0}")]
    InvalidDirective(String),

    /// A numeric field could not be parsed.
    #[error("Failed to parse {field} value `{value}` as integer: {source}")]
    InvalidInteger {
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// The test type is not one of the recognized values.
    #[error("Unknown test type: {0}")]
    UnknownTestType(String),
}

/// Result type for matrix construction.
pub type MatrixResult<T> = Result<T, MatrixError>;

/// The document submitted to start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMatrix {
    pub environment_matrix: EnvironmentMatrix,
    pub test_specification: TestSpecification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMatrix {
    pub android_device_list: AndroidDeviceList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidDeviceList {
    pub android_devices: Vec<AndroidDevice>,
}

/// One device configuration: `model,osVersion,locale,orientation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidDevice {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub android_model_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub android_version_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locale: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orientation: String,
}

/// What runs on the devices. Exactly one of the three tests is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_instrumentation_test: Option<AndroidInstrumentationTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_robo_test: Option<AndroidRoboTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_test_loop: Option<AndroidTestLoop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_timeout: Option<String>,
}

impl TestSpecification {
    /// Number of populated test variants.
    pub fn variant_count(&self) -> usize {
        [
            self.android_instrumentation_test.is_some(),
            self.android_robo_test.is_some(),
            self.android_test_loop.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidInstrumentationTest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_package_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_package_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_runner_class: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_targets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidRoboTest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_initial_activity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub robo_directives: Vec<RoboDirective>,
}

/// A scripted UI action: `resourceName,inputText,actionType`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoboDirective {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidTestLoop {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_package_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenario_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<i64>,
}

/// Builds the test matrix for the configured test type.
///
/// Parses the device list, the type-specific parameters and the timeout.
/// Nothing here touches the network, so a malformed input aborts the run
/// before any upload starts.
pub fn build_matrix(config: &StepConfig) -> MatrixResult<TestMatrix> {
    let test_type: TestType = config
        .test_type
        .parse()
        .map_err(MatrixError::UnknownTestType)?;

    let devices = parse_devices(&config.test_devices)?;

    let mut spec = TestSpecification {
        test_timeout: render_timeout(&config.test_timeout)?,
        ..Default::default()
    };

    match test_type {
        TestType::Instrumentation => {
            spec.android_instrumentation_test = Some(AndroidInstrumentationTest {
                app_package_id: config.app_package_id.clone(),
                test_package_id: config.inst_test_package_id.clone(),
                test_runner_class: config.inst_test_runner_class.clone(),
                test_targets: split_list(&config.inst_test_targets),
            });
        }
        TestType::Robo => {
            spec.android_robo_test = Some(AndroidRoboTest {
                app_initial_activity: config.robo_initial_activity.clone(),
                app_package_id: config.app_package_id.clone(),
                max_depth: parse_optional_int("robo_max_depth", &config.robo_max_depth)?,
                max_steps: parse_optional_int("robo_max_steps", &config.robo_max_steps)?,
                robo_directives: parse_directives(&config.robo_directives)?,
            });
        }
        TestType::Gameloop => {
            let scenarios = split_list(&config.loop_scenarios)
                .into_iter()
                .map(|s| parse_int("loop_scenarios", &s))
                .collect::<MatrixResult<Vec<_>>>()?;

            spec.android_test_loop = Some(AndroidTestLoop {
                app_package_id: config.app_package_id.clone(),
                scenario_labels: split_list(&config.loop_scenario_labels),
                scenarios,
            });
        }
    }

    Ok(TestMatrix {
        environment_matrix: EnvironmentMatrix {
            android_device_list: AndroidDeviceList {
                android_devices: devices,
            },
        },
        test_specification: spec,
    })
}

/// Parses the device matrix text, one device per non-blank line.
///
/// # Example
///
/// ```
/// use labrun::matrix::parse_devices;
///
/// let devices = parse_devices("Pixel2,28,en,portrait\n\nNexusLowRes,26,de,landscape\n")?;
/// assert_eq!(devices.len(), 2);
/// assert_eq!(devices[1].locale, "de");
/// # Ok::<(), labrun::matrix::MatrixError>(())
/// ```
pub fn parse_devices(text: &str) -> MatrixResult<Vec<AndroidDevice>> {
    non_blank_lines(text)
        .map(|line| match line.split(',').collect::<Vec<_>>()[..] {
            [model, version, locale, orientation] => Ok(AndroidDevice {
                android_model_id: model.to_string(),
                android_version_id: version.to_string(),
                locale: locale.to_string(),
                orientation: orientation.to_string(),
            }),
            _ => Err(MatrixError::InvalidDevice(line.to_string())),
        })
        .collect()
}

/// Parses robo directives, one `resourceName,inputText,actionType` per line.
pub fn parse_directives(text: &str) -> MatrixResult<Vec<RoboDirective>> {
    non_blank_lines(text)
        .map(|line| match line.split(',').collect::<Vec<_>>()[..] {
            [resource_name, input_text, action_type] => Ok(RoboDirective {
                action_type: action_type.to_string(),
                input_text: input_text.to_string(),
                resource_name: resource_name.to_string(),
            }),
            _ => Err(MatrixError::InvalidDirective(line.to_string())),
        })
        .collect()
}

/// Renders the timeout as the duration string the service expects.
///
/// `"120"` becomes `"120s"`; an empty value leaves the field unset.
pub fn render_timeout(text: &str) -> MatrixResult<Option<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u64>()
        .map_err(|source| MatrixError::InvalidInteger {
            field: "test_timeout",
            value: text.to_string(),
            source,
        })?;
    Ok(Some(format!("{}s", text)))
}

/// The submitted timeout in seconds, if one was given and is well formed.
pub fn timeout_secs(config: &StepConfig) -> Option<u64> {
    config.test_timeout.trim().parse().ok()
}

fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Splits a comma-separated list. Only the whole string is trimmed.
fn split_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.trim().split(',').map(str::to_string).collect()
}

fn parse_int(field: &'static str, value: &str) -> MatrixResult<i64> {
    value.parse().map_err(|source| MatrixError::InvalidInteger {
        field,
        value: value.to_string(),
        source,
    })
}

fn parse_optional_int(field: &'static str, value: &str) -> MatrixResult<Option<i64>> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_int(field, value).map(Some)
}
