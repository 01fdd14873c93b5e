//! pollterm - a terminal client for poll/validate REST system consoles
//!
//! The library holds everything except argument parsing and the event loop:
//!
//! - [`core`]: transport, session controller, scheduler and screen buffer
//! - [`ui`]: crossterm rendering, key mapping and the credential prompt
//! - [`config`]: `~/.pollterm/config.toml`

pub mod config;
pub mod core;
pub mod ui;
