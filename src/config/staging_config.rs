use std::borrow::Cow;
use std::path::{Path, PathBuf};

use compio::fs;
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;
use crate::staging::{
    DEFAULT_MAX_DEPTH, DEFAULT_SOURCE_MARKER, DEFAULT_TEST_MARKER, FileClassifier, TreeCopier,
};

const CONFIG_FILE_NAME: &str = "mutstage.yaml";
pub const DEFAULT_PREFIX: &str = "mut_";

fn get_config_file_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Settings shared by every staging command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    pub prefix: String,
    pub source_marker: String,
    pub test_marker: String,
    pub max_depth: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            source_marker: DEFAULT_SOURCE_MARKER.to_string(),
            test_marker: DEFAULT_TEST_MARKER.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl StagingConfig {
    /// Reads `mutstage.yaml` from `root`, falling back to defaults when the
    /// file does not exist.
    pub async fn read(root: &Path) -> Result<Self, StagingConfigError> {
        let path = get_config_file_path(root);
        if !path.exists() {
            info!(
                "No {} found in {}, using defaults",
                CONFIG_FILE_NAME,
                root.best_effort_path_display()
            );
            return Ok(Self::default());
        }
        Self::from_path(path).await
    }

    pub async fn from_path(path: PathBuf) -> Result<Self, StagingConfigError> {
        debug!("Reading config file: {}", path.best_effort_path_display());
        let bytes = fs::read(&path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;
        let contents = String::from_utf8_lossy(&bytes);
        Self::try_from(&*contents)
    }

    /// Replaces the prefix when one was given on the command line.
    pub fn with_prefix_override(
        mut self,
        prefix: Option<String>,
    ) -> Result<Self, StagingConfigError> {
        if let Some(prefix) = prefix {
            self.prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn classifier(&self) -> FileClassifier {
        FileClassifier::new(&self.source_marker, &self.test_marker)
    }

    pub fn tree_copier(&self) -> TreeCopier {
        TreeCopier::new(&self.prefix).with_max_depth(self.max_depth)
    }

    fn validate(&self) -> Result<(), StagingConfigError> {
        ensure!(!self.prefix.is_empty(), EmptyPrefixSnafu);
        ensure!(
            !self.prefix.chars().any(std::path::is_separator),
            PrefixSeparatorSnafu {
                prefix: self.prefix.clone()
            }
        );
        ensure!(
            !self.source_marker.is_empty(),
            EmptyMarkerSnafu {
                key: "source_marker"
            }
        );
        ensure!(
            !self.test_marker.is_empty(),
            EmptyMarkerSnafu { key: "test_marker" }
        );
        Ok(())
    }

    fn string_value(
        top_level: &LinkedHashMap<Yaml, Yaml>,
        key: &'static str,
    ) -> Result<Option<String>, StagingConfigError> {
        match top_level.get(&Yaml::Value(Scalar::String(Cow::Borrowed(key)))) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .context(InvalidValueSnafu {
                    key,
                    expected: "a string",
                }),
        }
    }

    fn depth_value(
        top_level: &LinkedHashMap<Yaml, Yaml>,
    ) -> Result<Option<usize>, StagingConfigError> {
        let key = "max_depth";
        match top_level.get(&Yaml::Value(Scalar::String(Cow::Borrowed(key)))) {
            None => Ok(None),
            Some(Yaml::Value(Scalar::Integer(depth))) if *depth > 0 => Ok(Some(*depth as usize)),
            Some(_) => InvalidValueSnafu {
                key,
                expected: "a positive integer",
            }
            .fail(),
        }
    }
}

impl TryFrom<&str> for StagingConfig {
    type Error = StagingConfigError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents = Yaml::load_from_str(contents)
            .map_err(|e| StagingConfigError::ParseError { source: e })?;
        let Some(document) = documents.first() else {
            debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        };

        let top_level = document
            .as_mapping()
            .ok_or(StagingConfigError::TopLevelNotMap)?;

        let defaults = Self::default();
        let config = StagingConfig {
            prefix: Self::string_value(top_level, "prefix")?.unwrap_or(defaults.prefix),
            source_marker: Self::string_value(top_level, "source_marker")?
                .unwrap_or(defaults.source_marker),
            test_marker: Self::string_value(top_level, "test_marker")?
                .unwrap_or(defaults.test_marker),
            max_depth: Self::depth_value(top_level)?.unwrap_or(defaults.max_depth),
        };
        config.validate()?;

        debug!("Loaded staging config: {:?}", config);
        Ok(config)
    }
}

#[derive(Debug, Snafu)]
pub enum StagingConfigError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Config key '{}' should be {}", key, expected))]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
    },
    #[snafu(display("Staging prefix must not be empty"))]
    EmptyPrefix,
    #[snafu(display("Staging prefix '{}' must not contain a path separator", prefix))]
    PrefixSeparator { prefix: String },
    #[snafu(display("Config key '{}' must not be empty", key))]
    EmptyMarker { key: &'static str },
}
