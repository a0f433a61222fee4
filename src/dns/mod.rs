//! DNS Server Module
//!
//! Answers queries for one zone from records kept in etcd.
//!
//! ## DNS Records
//!
//! - A records: IPv4 address stored under the name
//! - CNAME records: target within the zone, followed once to its A record
//! - TXT records: stored text
//!
//! Queries outside the zone, or for names without a record, are passed on
//! to the next handler of the chain and answered REFUSED if none claims them.

mod handler;
mod server;
pub mod wire;

pub use handler::{Chain, EtcdPlugin};
pub use server::{respond, run_dns_server};
