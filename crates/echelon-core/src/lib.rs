//! Concurrent progress trees for terminal output.
//!
//! A tree is built from [`StatusNode`]s: each node tracks one unit of work,
//! keeps a short rolling log, and renders its subtree as indented,
//! colorized lines with elapsed times. Deciding when to redraw and how to
//! move the cursor is left to the caller.

pub mod color;
pub mod duration;
mod gate;
pub mod node;
pub mod snapshot;

pub use color::{AnsiColor, ColorError};
pub use duration::format_duration;
pub use node::{DEFAULT_MAX_DESCRIPTION_LINES, NodeError, StatusNode};
pub use snapshot::NodeSnapshot;
