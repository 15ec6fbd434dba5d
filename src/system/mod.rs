//! # System Interaction Layer
//!
//! The boundary between the engine and the operating system.
//!
//! - **`executor`**: runs rendered scripts through the platform shell, either
//!   capturing their output or attached to the terminal.

pub mod executor;
