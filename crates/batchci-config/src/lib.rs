//! KDL configuration for batch CI orchestration.
//!
//! Configuration comes from a `batchci.kdl` file, with every field
//! overridable through `BATCHCI_<SECTION>_<FIELD>` environment variables.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    AutomationConfig, BatchConfig, BuildConfig, DatabaseConfig, OperatorConfig, ServerConfig,
    SourceConfig, StorageConfig, SystemConfig, TestConfig,
};
