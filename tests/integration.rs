#![cfg(feature = "integration")]

mod common;

#[path = "integration/completions.rs"]
mod completions;
#[path = "integration/config_errors.rs"]
mod config_errors;
#[path = "integration/config_file_flag.rs"]
mod config_file_flag;
#[path = "integration/dir_discovery.rs"]
mod dir_discovery;
#[path = "integration/health_gating.rs"]
mod health_gating;
#[path = "integration/logs_command.rs"]
mod logs_command;
#[path = "integration/port_collision.rs"]
mod port_collision;
#[path = "integration/start_stop.rs"]
mod start_stop;
#[path = "integration/status_json.rs"]
mod status_json;
#[path = "integration/validate_command.rs"]
mod validate_command;
