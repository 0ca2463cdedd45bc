//! Purchase settlement, fund movement, and the per-item rating ledger.
//!
//! Every mutation here runs under the store lock, so the money invariants
//! hold atomically: funds are conserved across a settlement, an item sells
//! at most once, and no balance ever goes negative. If the durability step
//! fails the in-memory effect is rolled back before the error surfaces.

use crate::error::{BazaarError, Result};
use crate::store::{State, Store};
use std::sync::Arc;
use tracing::debug;

pub struct PaymentProcessor {
    store: Arc<Store>,
}

impl PaymentProcessor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Settle a purchase. Preconditions are checked in order and abort with
    /// no side effects; the debit, credit, and sold mark are then applied
    /// together and persisted in the same critical section.
    pub async fn process_purchase(&self, buyer_id: &str, item_id: &str) -> Result<()> {
        let mut state = self.store.lock().await;

        let key = State::parse_item_key(item_id).ok_or(BazaarError::ItemNotFound)?;
        let (price, seller_id) = {
            let item = state.items.get(&key).ok_or(BazaarError::ItemNotFound)?;
            if item.sold {
                return Err(BazaarError::AlreadySold);
            }
            (item.price, item.seller_id.clone())
        };

        let buyer = state.user_by_id(buyer_id).ok_or(BazaarError::UserNotFound)?;
        if buyer_id == seller_id {
            return Err(BazaarError::SelfPurchase);
        }
        if buyer.balance < price {
            return Err(BazaarError::InsufficientFunds);
        }
        if state.user_by_id(&seller_id).is_none() {
            return Err(BazaarError::SellerNotFound);
        }

        if let Some(buyer) = state.user_by_id_mut(buyer_id) {
            buyer.balance -= price;
        }
        if let Some(seller) = state.user_by_id_mut(&seller_id) {
            seller.balance += price;
        }
        if let Some(item) = state.items.get_mut(&key) {
            item.sold = true;
            item.buyer_id = Some(buyer_id.to_string());
        }

        if let Err(err) = self.store.persist(&state) {
            if let Some(buyer) = state.user_by_id_mut(buyer_id) {
                buyer.balance += price;
            }
            if let Some(seller) = state.user_by_id_mut(&seller_id) {
                seller.balance -= price;
            }
            if let Some(item) = state.items.get_mut(&key) {
                item.sold = false;
                item.buyer_id = None;
            }
            return Err(err);
        }

        debug!(buyer = buyer_id, item = item_id, price, "purchase settled");
        Ok(())
    }

    /// Deposit into a user's balance. The amount must be positive.
    pub async fn add_funds(&self, user_id: &str, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Err(BazaarError::InvalidAmount);
        }
        let mut state = self.store.lock().await;
        {
            let user = state.user_by_id_mut(user_id).ok_or(BazaarError::UserNotFound)?;
            user.balance += amount;
        }
        if let Err(err) = self.store.persist_users(&state) {
            if let Some(user) = state.user_by_id_mut(user_id) {
                user.balance -= amount;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Withdraw from a user's balance. Fails with no state change if the
    /// amount is non-positive or exceeds the balance.
    pub async fn withdraw_funds(&self, user_id: &str, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Err(BazaarError::InvalidAmount);
        }
        let mut state = self.store.lock().await;
        {
            let user = state.user_by_id_mut(user_id).ok_or(BazaarError::UserNotFound)?;
            if amount > user.balance {
                return Err(BazaarError::InsufficientFunds);
            }
            user.balance -= amount;
        }
        if let Err(err) = self.store.persist_users(&state) {
            if let Some(user) = state.user_by_id_mut(user_id) {
                user.balance += amount;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Record a rating against the seller's oldest unrated sold item. A
    /// rating must be in (0, 5]; zero is the unrated sentinel. One rating
    /// per sale: once every sold item carries a rating, further ratings
    /// fail. Ratings live only in memory (the item file has no rating
    /// column), so no persistence happens here.
    pub async fn rate_seller(&self, seller_id: &str, rating: f64) -> Result<()> {
        if !(rating > 0.0 && rating <= 5.0) {
            return Err(BazaarError::InvalidRating);
        }
        let mut state = self.store.lock().await;
        if state.user_by_id(seller_id).is_none() {
            return Err(BazaarError::SellerNotFound);
        }

        let mut sold = state
            .items
            .values_mut()
            .filter(|item| item.seller_id == seller_id && item.sold)
            .peekable();
        if sold.peek().is_none() {
            return Err(BazaarError::NoSoldItems);
        }
        match sold.find(|item| item.rating == 0.0) {
            Some(item) => {
                item.rating = rating;
                Ok(())
            }
            None => Err(BazaarError::AllItemsRated),
        }
    }

    /// A seller's average over the nonzero ratings of their sold items,
    /// plus the count of rated sales. (0.0, 0) when nothing is rated yet.
    pub async fn seller_rating(&self, seller_id: &str) -> Result<(f64, usize)> {
        let state = self.store.lock().await;
        if state.user_by_id(seller_id).is_none() {
            return Err(BazaarError::SellerNotFound);
        }

        let ratings: Vec<f64> = state
            .items
            .values()
            .filter(|item| item.seller_id == seller_id && item.sold && item.rating > 0.0)
            .map(|item| item.rating)
            .collect();
        if ratings.is_empty() {
            return Ok((0.0, 0));
        }
        Ok((
            ratings.iter().sum::<f64>() / ratings.len() as f64,
            ratings.len(),
        ))
    }
}
