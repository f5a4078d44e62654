//! Test fixtures shared by this workspace's scenario tests: a Postgres
//! pool fixture gated on `ENGRAM_TEST_DATABASE_URL`, a deterministic fake
//! `ScmAdapter`, and a fake `MemoryServiceClient`.
//!
//! Kept as a dev-time-only dependency of the crates that use it, never a
//! production dependency.

mod db;
mod fake_memory_client;
mod fake_scm_adapter;

pub use db::db_pool;
pub use fake_memory_client::FakeMemoryServiceClient;
pub use fake_scm_adapter::FakeScmAdapter;
