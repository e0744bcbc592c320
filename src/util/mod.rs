//! Utility modules

pub mod paths;

pub use paths::{
    config_path, data_dir, ensure_layout, init_data_dir, log_file_path, logs_dir, HOME_ENV,
};
