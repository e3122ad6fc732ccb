//! sshtop client: configuration, the OpenSSH transport and the dashboard built
//! on top of `sshtop_engine`.

pub mod app;
pub mod config;
pub mod demo;
pub mod headless;
pub mod secrets;
pub mod ssh;
pub mod ui;
