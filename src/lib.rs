//! # asm-kernel
//!
//! Interactive execution harness for x86-64 assembly snippets. Each
//! submission is compiled with yasm or nasm, linked with gcc or ld, and run
//! with its output streamed back as it is produced. A running program can
//! ask the user for input by printing the `<inputRequest>` marker.
//!
//! ## Usage
//!
//! ```bash
//! asm-kernel run hello.asm
//! ```
//!
//! Build settings come from `;%key: value` lines at the top of a snippet:
//!
//! ```text
//! ;%compiler: nasm
//! ;%cflags: -f elf64
//! ;%ldflags: -no-pie
//! ;%args: "hello world" 42
//! ```
//!
//! ## Modules
//!
//! - `channel` - Output channel towards the front end
//! - `config` - Harness configuration from file and environment
//! - `directives` - `;%key: value` directive parsing
//! - `pipeline` - Compile, link and execute state machine
//! - `session` - Long-lived session dispatching submissions
//! - `subprocess` - Streaming subprocess abstraction with mock support
//! - `testing` - Test doubles for the output channel
pub mod channel;
pub mod config;
pub mod directives;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod subprocess;

pub mod testing;

pub use error::{Error, Result};
