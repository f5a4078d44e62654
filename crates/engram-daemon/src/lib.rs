pub mod api_types;
pub mod bootstrap;
pub mod breaker_sweep;
pub mod outbox_worker;
pub mod routes;
pub mod state;
