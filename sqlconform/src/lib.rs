//! Conformance case model and runner for Postgres-wire, version-controlled
//! databases.
//!
//! A conformance run executes an ordered script of [`TestCase`]s over a single
//! connection and asserts, per case, either the affected-row count or the
//! field values of the returned result set. Later cases depend on the side
//! effects of earlier ones, so the runner stops at the first hard failure.
//!
//! # Usage
//!
//! Implement [`AsyncDB`] for your connection (or use the built-in Postgres
//! engine from the `sqlconform-engines` crate):
//!
//! ```ignore
//! struct Connection {...}
//!
//! #[async_trait]
//! impl sqlconform::AsyncDB for Connection {
//!     type Error = ...;
//!     async fn run(&mut self, sql: &str) -> Result<DBOutput, Self::Error> {
//!         ...
//!     }
//! }
//! ```
//!
//! Then drive a case list through a [`Runner`]:
//!
//! ```ignore
//! let cases = vec![
//!     TestCase::statement("insert into test (pk) values (0)", 1),
//!     TestCase::query("select pk from test", "pk", ["0"]),
//! ];
//! let verdict = Runner::new(Connection::new()).run_async(&cases).await;
//! assert!(verdict.is_success());
//! ```

pub mod case;
pub mod runner;

pub use self::case::*;
pub use self::runner::*;
