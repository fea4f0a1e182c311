pub mod file_source;

pub use file_source::{table_expression, FileSource};
