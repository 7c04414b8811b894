pub mod lexer;
mod reader;

pub use reader::{read, read_many, Reader, MAX_READ_DEPTH};
