mod settings;

pub use settings::{
    Config, ConfigError, ControlConfig, ServerConfig, StreamsConfig, TimelineConfig,
    EXAMPLE_CONFIG,
};
