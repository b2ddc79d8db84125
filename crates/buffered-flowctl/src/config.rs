//! Configuration for a flow-controlled channel.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default low water mark: resume writing once 256 KiB or less are buffered.
pub const DEFAULT_LOW_WATER_MARK: u64 = 256 * 1024;

/// Default high water mark: pause writing once 1 MiB or more is buffered.
pub const DEFAULT_HIGH_WATER_MARK: u64 = 1024 * 1024;

/// An error that occurred while building a [`FlowCtrlConfig`].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("Field was not provided: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },
    /// A single field had a value that proved to be unusable.
    #[error("Value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the invalid field
        field: String,
        /// A description of the problem.
        problem: String,
    },
    /// Multiple fields are inconsistent.
    #[error("Fields {fields:?} are inconsistent: {problem}")]
    Inconsistent {
        /// The names of the inconsistent fields
        fields: Vec<String>,
        /// The problem that makes them inconsistent
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

/// Watermarks for a [`FlowController`](crate::FlowController).
///
/// This type is immutable once constructed.  To build one, use
/// [`FlowCtrlConfigBuilder`], or deserialize the builder from a string.
#[derive(Debug, Clone, Builder, Eq, PartialEq)]
#[builder(build_fn(validate = "Self::validate", error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct FlowCtrlConfig {
    /// Resume writing once the channel's buffered amount is at or below this
    /// many bytes.
    ///
    /// This value is handed to the channel as its "buffered amount low"
    /// threshold.
    #[builder(default = "DEFAULT_LOW_WATER_MARK")]
    pub(crate) low_water_mark: u64,
    /// Pause writing once the channel's buffered amount is at or above this
    /// many bytes.
    #[builder(default = "DEFAULT_HIGH_WATER_MARK")]
    pub(crate) high_water_mark: u64,
}

impl FlowCtrlConfig {
    /// Return a new builder for a `FlowCtrlConfig`.
    pub fn builder() -> FlowCtrlConfigBuilder {
        FlowCtrlConfigBuilder::default()
    }

    /// Make a configuration with the given watermarks.
    ///
    /// Fails unless `low_water_mark < high_water_mark`.
    pub fn new(low_water_mark: u64, high_water_mark: u64) -> Result<Self, ConfigBuildError> {
        Self::builder()
            .low_water_mark(low_water_mark)
            .high_water_mark(high_water_mark)
            .build()
    }

    /// The low water mark, in bytes.
    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    /// The high water mark, in bytes.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }
}

impl Default for FlowCtrlConfig {
    fn default() -> Self {
        FlowCtrlConfig {
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl FlowCtrlConfigBuilder {
    /// Check that the watermarks leave room to make progress.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        let low = self.low_water_mark.unwrap_or(DEFAULT_LOW_WATER_MARK);
        let high = self.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK);
        if high == 0 {
            return Err(ConfigBuildError::Invalid {
                field: "high_water_mark".into(),
                problem: "must be greater than zero".into(),
            });
        }
        if low >= high {
            return Err(ConfigBuildError::Inconsistent {
                fields: vec!["low_water_mark".into(), "high_water_mark".into()],
                problem: format!(
                    "low water mark ({}) must be below the high water mark ({})",
                    low, high
                ),
            });
        }
        Ok(())
    }
}
