//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **Sanitization**: Turning raw feed markup into safe plain text
//! - **Text processing**: Control-character stripping and Unicode-aware truncation
//!
//! # Examples
//!
//! ```
//! use gleaner::util::{sanitize_markup, truncate_to_width};
//!
//! // Feed bodies arrive as HTML
//! assert_eq!(sanitize_markup("<p>Hello <b>world</b></p>"), "Hello world");
//!
//! // Truncate to fit a terminal column
//! assert_eq!(truncate_to_width("Long article title", 10), "Long ar...");
//! ```

mod sanitize;
mod text;

pub use sanitize::{decode_entities, sanitize_markup};
pub use text::{strip_control_chars, truncate_to_width};
