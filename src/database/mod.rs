pub mod memory_repository;
pub mod pg_repository;
pub mod pool;
pub mod repository;
