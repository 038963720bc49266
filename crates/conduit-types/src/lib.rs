//! Shared message, tool and error types for Conduit.

pub mod error;
pub mod message;
pub mod provider;
pub mod sse;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConduitError, ConfigError, ToolError};
pub use message::*;
pub use tool::*;
pub use util::{summarize_json, truncate_for_display, truncate_str};
