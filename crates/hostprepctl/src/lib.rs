//! hostprepctl - step catalog, operator surfaces and CLI wiring

pub mod app;
pub mod handlers;
pub mod logging;
pub mod menu;
pub mod status;
pub mod validate;
