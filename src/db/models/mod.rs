pub mod activation;
pub mod metrics;
pub mod sensor;
pub mod versus;

pub use activation::{ActivationFilter, ActivationRecord, ExportRow};
pub use metrics::{DailyMetric, HourlyStat};
pub use sensor::{SensorId, SensorLabel, SensorVideo};
pub use versus::VersusRecord;
