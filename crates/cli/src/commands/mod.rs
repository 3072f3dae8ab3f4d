pub mod ask;
pub mod config_cmd;
pub mod conversations;
pub mod doctor;
pub mod serve;
