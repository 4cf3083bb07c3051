//! A single-node IRC daemon: RFC 1459/2812 command grammar with IRCv3
//! capability negotiation, SASL PLAIN, away messages and multi-prefix.

pub mod auth;
pub mod channel;
pub mod client;
pub mod commands;
pub mod config;
pub mod constants;
pub mod errors;
pub mod handlers;
pub mod lookup;
pub mod metrics;
pub mod modes;
pub mod names;
pub mod parsers;
pub mod replies;
pub mod server;

#[cfg(test)]
mod session_tests;
