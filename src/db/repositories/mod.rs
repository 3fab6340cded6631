mod activations;
mod metrics;
mod sensors;
mod system_config;
pub(crate) mod versus;
