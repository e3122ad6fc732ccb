//! UI module root: exposes drawing functions for individual panels.

pub mod confirm;
pub mod cpu;
pub mod form;
pub mod header;
pub mod mem;
pub mod server;
pub mod util;
