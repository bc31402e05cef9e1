pub mod configuration;
pub use configuration::*;

pub mod data_capture;

pub mod error_handling;

pub mod session_management;
pub use session_management::*;

pub mod storage;
