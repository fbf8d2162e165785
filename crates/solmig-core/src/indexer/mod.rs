pub mod contracts;
pub mod filesystem;
pub mod graph;
pub mod imports;
pub mod parser;
pub mod pipeline;
