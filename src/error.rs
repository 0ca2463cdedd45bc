//! Error types for the bazaar marketplace server.
//!
//! Every failure a request handler can hit is a variant here; the `Display`
//! text doubles as the reason field of a `FAILURE` response.

use std::io;
use thiserror::Error;

/// Result type alias for marketplace operations
pub type Result<T> = std::result::Result<T, BazaarError>;

/// Custom error types for the marketplace
#[derive(Error, Debug)]
pub enum BazaarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol parse error: {0}")]
    Protocol(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Item not found")]
    ItemNotFound,

    #[error("Seller not found")]
    SellerNotFound,

    #[error("Item already sold")]
    AlreadySold,

    #[error("Only the seller can remove a listing")]
    NotSeller,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Cannot purchase your own item")]
    SelfPurchase,

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid rating")]
    InvalidRating,

    #[error("No sold items to rate")]
    NoSoldItems,

    #[error("All items already rated")]
    AllItemsRated,

    #[error("Server error: {0}")]
    Server(String),
}
