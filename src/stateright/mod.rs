//! Stateright Model Checking
//!
//! Exhaustive state-space exploration of the concurrency protocols in this
//! crate.
//!
//! ## Available Models
//!
//! - `lazy_init`: double-checked client construction (single construction,
//!   shared instance)
//!
//! ## Running Model Checks
//!
//! ```bash
//! cargo test stateright -- --nocapture
//! ```

pub mod lazy_init;
