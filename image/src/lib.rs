//! Masters a directory tree into a single self-describing image file, and
//! reads it back without loading it into memory.

mod errors;

pub mod fs;
pub mod import;
pub mod integrity;
pub mod master;
pub mod nodes;
pub mod read_at;
pub mod reader;
pub mod wire;
pub mod writer;

#[cfg(test)]
mod fixtures;

pub use errors::{Error, FormatError};
pub use fs::{Attributes, ImageFs};
pub use import::ImportOptions;
pub use master::{master, MasterSummary};
pub use nodes::{Kind, Metadata, TreeNode};
pub use read_at::ReadAt;
pub use reader::{ImageReader, Record};
