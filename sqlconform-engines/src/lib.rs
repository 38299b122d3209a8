//! Built-in engines for the conformance harness.

mod postgres;

pub use postgres::{Postgres, PostgresConfig};
