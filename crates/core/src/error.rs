use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },
}
