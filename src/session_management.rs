//! Session lifecycle: who is streaming, and the manager turning session
//! starts and ends into report tasks.

pub mod report_manager;
pub mod session;

#[cfg(test)]
mod integration_tests;

pub use report_manager::ReportManager;
pub use session::{Session, SessionKey};
