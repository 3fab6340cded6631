use crate::db::SensorId;

/// Rejected caller input. Always raised before any ledger or tracker state
/// changes, so retrying with corrected input is safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    DuplicateSensor(SensorId),
    UnknownSensor(SensorId),
    VersusModeOutOfRange(i64),
    DurationOutOfRange(u64),
    InvalidTimestamp(String),
    EmptyRange,
    InvalidGroupBy(String),
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputError::DuplicateSensor(id) => write!(f, "sensor {id} reported more than once"),
            InputError::UnknownSensor(id) => write!(f, "sensor {id} is not configured"),
            InputError::VersusModeOutOfRange(mode) => {
                write!(f, "versus mode must be between 1 and 4, got {mode}")
            }
            InputError::DurationOutOfRange(ms) => write!(f, "duration {ms} ms is out of range"),
            InputError::InvalidTimestamp(raw) => {
                write!(f, "'{raw}' is neither an RFC 3339 instant nor a YYYY-MM-DD date")
            }
            InputError::EmptyRange => write!(f, "range end must be after its start"),
            InputError::InvalidGroupBy(raw) => {
                write!(f, "group_by must be hour, day or sensor, got '{raw}'")
            }
        }
    }
}

impl std::error::Error for InputError {}

/// True when `err` (or anything in its context chain) is an [`InputError`].
pub fn is_input_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<InputError>().is_some())
}
