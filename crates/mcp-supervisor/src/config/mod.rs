//! Agent configuration: parsing, validation and the immutable snapshot type.
//!
//! The on-disk document is parsed into a loose [`raw`] form first so secrets
//! and environment fallbacks can be layered in, then validated in a fixed
//! order into a [`Configuration`]. Nothing outside this module can build a
//! `Configuration`, so holding one means the checks have passed.

pub mod discovery;
pub mod error;
pub mod load;
pub mod model_id;
mod raw;
pub mod types;

pub use discovery::*;
pub use error::*;
pub use load::*;
pub use model_id::*;
pub use types::*;
