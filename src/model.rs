//! Marketplace entities: users, items, and messages.
//!
//! These are plain records; lifecycle rules (who may mutate what, and when)
//! are enforced by the store and the payment processor, which own them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account. Active listings, purchase history, and sold items
/// are not stored here; they are recomputed from the item table so the
/// derived views can never drift from item state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    /// Compared by exact equality; hashing is explicitly out of scope.
    pub password: String,
    pub bio: String,
    pub balance: f64,
}

impl User {
    /// Create a fresh account with a zero balance and a generated id.
    pub fn new(username: &str, password: &str, bio: &str) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: password.to_string(),
            bio: bio.to_string(),
            balance: 0.0,
        }
    }

    pub fn validate_password(&self, password: &str) -> bool {
        self.password == password
    }
}

/// A listing. `sold` and `buyer_id` are set together, exactly once; `rating`
/// is written at most once, by the first seller rating that reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Derived from the description at creation (and at reload).
    pub tags: Vec<String>,
    pub price: f64,
    /// Rating in `[0, 5]`; `0.0` means unrated.
    pub rating: f64,
    pub sold: bool,
    pub buyer_id: Option<String>,
}

impl Item {
    pub fn new(
        item_id: String,
        seller_id: &str,
        title: &str,
        description: &str,
        category: &str,
        price: f64,
        tags: Vec<String>,
    ) -> Self {
        Self {
            item_id,
            seller_id: seller_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            tags,
            price,
            rating: 0.0,
            sold: false,
            buyer_id: None,
        }
    }

    /// Record the sale. Returns false (and changes nothing) if the item has
    /// already been sold.
    pub fn mark_sold(&mut self, buyer_id: &str) -> bool {
        if self.sold {
            return false;
        }
        self.sold = true;
        self.buyer_id = Some(buyer_id.to_string());
        true
    }
}

/// One chat message. Messages are append-only; only `read` may change later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Milliseconds since the epoch, strictly monotonic per store.
    pub timestamp: u64,
    pub read: bool,
}

impl Message {
    pub fn new(sender_id: &str, receiver_id: &str, content: &str, timestamp: u64) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            timestamp,
            read: false,
        }
    }

    /// True if this message belongs to the conversation between `a` and `b`.
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Format a balance, price, or rating for the wire and the flat files.
/// Integral values keep one trailing decimal ("40.0"), matching what every
/// existing client expects to parse back.
pub fn fmt_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_starts_empty() {
        let user = User::new("alice", "pw1", "hi there");
        assert_eq!(user.balance, 0.0);
        assert!(user.validate_password("pw1"));
        assert!(!user.validate_password("PW1"));
        assert!(!user.user_id.is_empty());
    }

    #[test]
    fn test_item_sells_exactly_once() {
        let mut item = Item::new("1".to_string(), "s1", "Lamp", "desc", "Home", 15.0, vec![]);
        assert!(!item.sold);
        assert!(item.mark_sold("b1"));
        assert!(item.sold);
        assert_eq!(item.buyer_id.as_deref(), Some("b1"));

        // A second sale must not overwrite the first buyer.
        assert!(!item.mark_sold("b2"));
        assert_eq!(item.buyer_id.as_deref(), Some("b1"));
    }

    #[test]
    fn test_message_involves_either_direction() {
        let message = Message::new("u1", "u2", "hello", 42);
        assert!(message.involves("u1", "u2"));
        assert!(message.involves("u2", "u1"));
        assert!(!message.involves("u1", "u3"));
        assert!(!message.read);
    }

    #[test]
    fn test_fmt_decimal() {
        assert_eq!(fmt_decimal(40.0), "40.0");
        assert_eq!(fmt_decimal(0.0), "0.0");
        assert_eq!(fmt_decimal(4.5), "4.5");
        assert_eq!(fmt_decimal(25.0), "25.0");
        assert_eq!(fmt_decimal(99.99), "99.99");
    }
}
