pub mod aggregation;
pub mod configuration;
pub mod data_capture;
pub mod error_handling;
pub mod report;
pub mod session_management;
pub mod storage;
pub mod web_interface;
