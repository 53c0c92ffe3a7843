pub mod commands;
pub mod wizard;
