//! Bazaar - a line-protocol marketplace server
//!
//! This library provides a multi-client marketplace backend with:
//! - TCP server speaking a comma-separated line protocol
//! - A coarse-locked domain store with flat-file persistence
//! - Transactional purchase settlement and a per-item rating ledger
//! - Keyword relevance search with tag extraction

pub mod client;
pub mod error;
pub mod model;
pub mod payment;
pub mod protocol;
pub mod search;
pub mod server;
pub mod store;
pub mod tags;

pub use client::Client;
pub use error::{BazaarError, Result};
pub use model::{Item, Message, User};
pub use payment::PaymentProcessor;
pub use protocol::{Request, Response};
pub use search::SearchEngine;
pub use server::{MarketServer, ServerConfig};
pub use store::Store;
pub use tags::Lexicon;
