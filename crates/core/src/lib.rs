pub mod config;
pub mod error;
pub mod liveness;
pub mod machine;
pub mod time;

pub use config::{load_dotenv, EngineConfig};
pub use error::*;
pub use liveness::*;
pub use machine::*;
pub use time::*;
