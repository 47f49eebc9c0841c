pub mod auth_client;
pub mod config;
pub mod error;
pub mod focus_log_repository;
pub mod session_store;
pub mod storage;
pub mod task_store;
