//! # rvoip-script-core
//!
//! Call-control scripting for the rvoip IVR server: the immutable compiled
//! [`ScriptImage`], a small reference [`Compiler`] that produces it, and the
//! stack-based [`Interpreter`] that executes it one line per step.
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_script_core::{Compiler, Interpreter, InterpreterConfig, NullHost};
//!
//! let image = Compiler::new()
//!     .compile("hello.scr", "@main\n  set x \"1\"\n  expr x += 1\n  exit\n")
//!     .into_image()
//!     .unwrap();
//!
//! let mut interp = Interpreter::new(InterpreterConfig::default());
//! assert!(interp.attach(Arc::new(image), None));
//! while interp.step(&mut NullHost) {}
//! assert_eq!(interp.symbol("x"), Some("2"));
//! ```

pub mod compiler;
pub mod error;
pub mod expr;
pub mod host;
pub mod image;
pub mod interpreter;
pub mod symbols;

pub use compiler::{CompileOutput, Compiler};
pub use error::{Diagnostic, Result, ScriptError};
pub use host::{HostAction, NullHost, ScriptHost};
pub use image::{Arg, Command, Header, Line, Mask, ScriptImage};
pub use interpreter::{ExitReason, Frame, FrameKind, Interpreter, InterpreterConfig, DEFAULT_ENTRY};
