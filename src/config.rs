//! Run configuration and its translation into backend command arguments.
//!
//! A [`DaqConfig`] records exactly the arguments of the last successful
//! `configure` call; this is deliberately different from the arguments the
//! control link expects, which are produced on demand by the translation
//! methods here. The key translation is one-way: when `use_l3t` is set, the
//! event count is sent as `l3t_events` (post-filter events), otherwise as
//! plain `events`.
//!
//! [`configuration_schema`] describes the configuration fields with the
//! source tags, data kinds, and shapes the encompassing control system
//! expects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::backend::BackendArgs;
use crate::error::{DaqError, DaqResult};

/// Value of one control variable attached to the data stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Free-form text.
    Text(String),
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(b) => write!(f, "{}", b),
            ControlValue::Int(i) => write!(f, "{}", i),
            ControlValue::Float(fl) => write!(f, "{}", fl),
            ControlValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Bool(value)
    }
}

impl From<i64> for ControlValue {
    fn from(value: i64) -> Self {
        ControlValue::Int(value)
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        ControlValue::Float(value)
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        ControlValue::Text(value.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(value: String) -> Self {
        ControlValue::Text(value)
    }
}

/// The committed run configuration.
///
/// Exactly one of `events` / `duration` is effective; `events` takes
/// priority when both are present. A count of `0` events means an unbounded
/// run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Number of events to stop acquisition at, if event-bounded.
    pub events: Option<u64>,
    /// Run length in seconds, if time-bounded.
    pub duration: Option<f64>,
    /// Reinterpret `events` as post-level-3-trigger events.
    pub use_l3t: bool,
    /// Record the run to storage.
    pub record: bool,
    /// Control variables to inject into the data stream.
    pub controls: Option<Vec<(String, ControlValue)>>,
}

impl DaqConfig {
    /// Translate into arguments for the backend `configure` command.
    pub(crate) fn configure_args(&self) -> DaqResult<BackendArgs> {
        let mut args = self.run_args()?;
        args.record = Some(self.record);
        Ok(args)
    }

    /// Translate into arguments for the backend `begin` command.
    ///
    /// Fails with [`DaqError::Configuration`] when neither `events` nor
    /// `duration` resolves.
    pub(crate) fn run_args(&self) -> DaqResult<BackendArgs> {
        let mut args = BackendArgs::default();
        if let Some(events) = self.events {
            if self.use_l3t {
                args.l3t_events = Some(events);
            } else {
                args.events = Some(events);
            }
        } else if let Some(duration) = self.duration {
            args.duration = Some(duration);
        } else {
            return Err(DaqError::Configuration(
                "either events or duration must be provided".to_string(),
            ));
        }
        args.controls = self.controls.clone();
        Ok(args)
    }
}

/// Data kind of a configuration field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Scalar numeric field.
    Number,
    /// Array-valued field.
    Array,
}

/// Static metadata describing one configuration field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    /// Source tag of the field in the control system.
    pub source: String,
    /// Data kind of the field.
    pub dtype: DataKind,
    /// Shape for array fields, absent for scalars or when unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

impl FieldDescription {
    fn scalar(source: &str) -> Self {
        Self {
            source: source.to_string(),
            dtype: DataKind::Number,
            shape: None,
        }
    }
}

/// Describe the configuration schema.
///
/// `controls_len` is the number of currently configured control variables,
/// if any; it determines the shape of the `controls` field.
pub fn configuration_schema(controls_len: Option<usize>) -> HashMap<String, FieldDescription> {
    let mut schema = HashMap::new();
    schema.insert(
        "events".to_string(),
        FieldDescription::scalar("daq_events_in_run"),
    );
    schema.insert(
        "duration".to_string(),
        FieldDescription::scalar("daq_run_duration"),
    );
    schema.insert(
        "use_l3t".to_string(),
        FieldDescription::scalar("daq_use_l3trigger"),
    );
    schema.insert(
        "record".to_string(),
        FieldDescription::scalar("daq_record_run"),
    );
    schema.insert(
        "controls".to_string(),
        FieldDescription {
            source: "daq_control_vars".to_string(),
            dtype: DataKind::Array,
            shape: controls_len.map(|n| vec![n, 2]),
        },
    );
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_translate_to_l3t_events_when_filtering() {
        let config = DaqConfig {
            events: Some(120),
            use_l3t: true,
            ..Default::default()
        };
        let args = config.configure_args().unwrap();
        assert_eq!(args.l3t_events, Some(120));
        assert_eq!(args.events, None);
        assert_eq!(args.record, Some(false));
    }

    #[test]
    fn test_events_take_priority_over_duration() {
        let config = DaqConfig {
            events: Some(240),
            duration: Some(10.0),
            ..Default::default()
        };
        let args = config.run_args().unwrap();
        assert_eq!(args.events, Some(240));
        assert_eq!(args.duration, None);
    }

    #[test]
    fn test_duration_used_when_no_events() {
        let config = DaqConfig {
            duration: Some(2.5),
            ..Default::default()
        };
        let args = config.run_args().unwrap();
        assert_eq!(args.duration, Some(2.5));
    }

    #[test]
    fn test_unresolvable_config_is_an_error() {
        let err = DaqConfig::default().run_args().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_controls_forwarded_to_backend() {
        let config = DaqConfig {
            events: Some(10),
            controls: Some(vec![
                ("motor_x".to_string(), ControlValue::Float(1.25)),
                ("sample".to_string(), ControlValue::from("cu_foil")),
            ]),
            ..Default::default()
        };
        let args = config.run_args().unwrap();
        assert_eq!(args.controls.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_schema_shapes() {
        let schema = configuration_schema(Some(3));
        assert_eq!(schema["controls"].shape, Some(vec![3, 2]));
        assert_eq!(schema["controls"].dtype, DataKind::Array);
        assert_eq!(schema["events"].source, "daq_events_in_run");
        assert_eq!(schema["events"].shape, None);

        let schema = configuration_schema(None);
        assert_eq!(schema["controls"].shape, None);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = DaqConfig {
            events: Some(120),
            use_l3t: true,
            record: true,
            controls: Some(vec![("angle".to_string(), ControlValue::Float(0.5))]),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DaqConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
