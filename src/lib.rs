//! In-memory key-value server speaking a RESP-style wire protocol.
//!
//! Requests are arrays of bulk strings (`hello`, `client`, `get`, `set`,
//! `del`); replies are scalar, bulk, or map values. Each module covers a
//! concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`server`] binds the listener, accepts connections, and runs the
//!   dispatch engine that serializes every command against the store.
//! - [`peer`] runs one decode loop per connection, turning wire values into
//!   commands for the dispatch engine.
//! - [`command`] is the closed command vocabulary with decode-time arity
//!   checks.
//! - [`store`] is the shared byte-to-byte map behind a reader/writer lock.
//! - [`resp`] provides the wire codec plus async read/write helpers.
//! - [`client`] is a small async client used by the CLI and the
//!   integration tests.

pub mod cli;
pub mod client;
pub mod command;
pub mod peer;
pub mod resp;
pub mod server;
pub mod store;

/// Default listen address when `--listen`/`--server` is not given.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5001";
