pub mod canonical;
pub mod matcher;
pub mod merge;
pub mod resolver;
pub mod text;
