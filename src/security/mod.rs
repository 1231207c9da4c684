//! Security utilities: safe file names, output-root confinement and
//! credential redaction.

pub mod path;
pub mod redaction;

pub use path::{confine_to_root, safe_file_name};
