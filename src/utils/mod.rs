//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Engine configuration and app data directory (XDG-compliant)
//! - [`cancel`] - Cancellation token polled by long scans
//! - [`encoding`] - Variable-length integers and little-endian helpers
//! - [`tokenizer`] - Word, sentence and paragraph splitting
//!
//! ## Key Functions
//!
//! ```no_run
//! use termdex::utils::{tokenize, SentenceState};
//!
//! let mut state = SentenceState::new();
//! let tokens = tokenize("One two. Three", &mut state);
//! // Returns: one (0,0), two (0,1), three (1,0)
//! ```

pub mod app_data;
pub mod cancel;
pub mod encoding;
pub mod tokenizer;

pub use app_data::*;
pub use cancel::*;
pub use encoding::*;
pub use tokenizer::*;
