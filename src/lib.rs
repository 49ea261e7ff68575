//! # sigdec - signature and throttling-token decipherer
//!
//! Recovers usable URLs from values scrambled by algorithms embedded, in
//! obfuscated and versioned form, inside third-party player scripts.
//!
//! ## Features
//!
//! - Structural extraction of the three-operation signature algorithm
//! - Brace/quote-aware function boundary scanning
//! - Sandboxed, deadline-bounded execution of the throttling-token
//!   transform
//! - Per-script caching of derived pipelines and functions
//!
//! ## Example
//!
//! ```rust,no_run
//! use sigdec::{Decipherer, ScriptConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Script text fetched by the caller (network is out of scope here).
//!     let config = ScriptConfig::new(std::fs::read_to_string("player.js")?);
//!
//!     let decipherer = Decipherer::new();
//!     let url = decipherer.decipher_url(&config, "s=...&sp=sig&url=...", "VIDEO_ID")?;
//!     println!("playable: {}", url);
//!
//!     Ok(())
//! }
//! ```

pub mod decipher;
pub mod error;
pub mod eval;
pub mod extract;
pub mod ops;
pub mod scanner;

// Re-export main types
pub use decipher::{CipherParams, DebugHook, Decipherer, ScriptConfig, TokenObserver, THROTTLE_KEY};
pub use error::SigdecError;
pub use eval::{DenoEvaluator, ScriptEvaluator};
pub use extract::ExtractedFunction;
pub use ops::{DecipherOp, OperationPipeline};

/// Result type alias for sigdec operations
pub type Result<T> = std::result::Result<T, SigdecError>;
