/// Durable process execution service
pub mod process_service;
