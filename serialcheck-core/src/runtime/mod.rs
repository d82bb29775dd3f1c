pub mod markers;
pub mod parser;
pub mod sanitize;
