//! Core console components.
//!
//! - **transport**: REST wire types and the `ConsoleTransport` trait
//! - **session**: Session controller (authentication, polling, input)
//! - **scheduler**: Periodic tick deciding the next request
//! - **directive**: Decoding of server output messages
//! - **screen**: Output grid, input line and input lock
//! - **console**: Composition of the above plus log history
//!
//! # Architecture
//!
//! ```text
//! Console
//! ├── Scheduler (tick → authenticate | poll | solicit credentials)
//! ├── SessionController
//! │   └── ConsoleTransport (HttpTransport over reqwest)
//! └── ScreenBuffer
//!     ├── Rows (fixed-width cells)
//!     └── InputLine (text + lock)
//! ```

pub mod console;
pub mod directive;
pub mod scheduler;
pub mod screen;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;
