pub mod config_cmd;
pub mod gateway;
pub mod onboard;
