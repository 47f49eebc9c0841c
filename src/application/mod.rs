pub mod bootstrap;
pub mod commands;
pub mod session;
pub mod tasks;
pub mod timer;
