//! Client library for the marketplace wire protocol.
//!
//! One method per protocol command, returning parsed payloads. The caller
//! keeps track of the user id returned by [`Client::login`]; the server does
//! not hold session state.

use crate::error::{BazaarError, Result};
use crate::model::fmt_decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

/// Connected protocol client.
pub struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

/// Full item record as returned by GET_ITEM.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDetails {
    pub item_id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub sold: bool,
    pub buyer_id: Option<String>,
}

/// One row of a GET_USER_LISTINGS response.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSummary {
    pub item_id: String,
    pub title: String,
    pub price: f64,
    pub sold: bool,
}

/// One row of a GET_MESSAGES response.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub timestamp: u64,
    pub content: String,
}

/// A GET_RATING / GET_MY_RATING response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellerRating {
    pub average: f64,
    pub count: usize,
}

impl Client {
    /// Connect to a marketplace server.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    /// Send one request line and return the SUCCESS payload fields.
    async fn request(&mut self, command: &str, fields: &[&str]) -> Result<Vec<String>> {
        let mut line = command.to_string();
        for field in fields {
            line.push(',');
            line.push_str(field);
        }
        line.push('\n');

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut response = String::new();
        let read = self.reader.read_line(&mut response).await?;
        if read == 0 {
            return Err(BazaarError::Protocol(
                "connection closed by server".to_string(),
            ));
        }
        parse_response(response.trim_end_matches(['\r', '\n']))
    }

    pub async fn register(&mut self, username: &str, password: &str, bio: &str) -> Result<()> {
        self.request("REGISTER", &[username, password, bio]).await?;
        Ok(())
    }

    /// Log in and return the user id to carry on later requests.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        let payload = self.request("LOGIN", &[username, password]).await?;
        payload
            .into_iter()
            .next()
            .ok_or_else(|| BazaarError::Protocol("LOGIN response missing user id".to_string()))
    }

    pub async fn delete_account(&mut self, user_id: &str) -> Result<()> {
        self.request("DELETE_ACCOUNT", &[user_id]).await?;
        Ok(())
    }

    /// List an item and return its generated id.
    pub async fn add_item(
        &mut self,
        seller_id: &str,
        title: &str,
        description: &str,
        category: &str,
        price: f64,
    ) -> Result<String> {
        let price = fmt_decimal(price);
        let payload = self
            .request("ADD_ITEM", &[seller_id, title, description, category, &price])
            .await?;
        payload
            .into_iter()
            .next()
            .ok_or_else(|| BazaarError::Protocol("ADD_ITEM response missing item id".to_string()))
    }

    pub async fn get_item(&mut self, item_id: &str) -> Result<ItemDetails> {
        let payload = self.request("GET_ITEM", &[item_id]).await?;
        if payload.len() < 7 {
            return Err(BazaarError::Protocol(
                "GET_ITEM response too short".to_string(),
            ));
        }
        Ok(ItemDetails {
            item_id: payload[0].clone(),
            seller_id: payload[1].clone(),
            title: payload[2].clone(),
            description: payload[3].clone(),
            category: payload[4].clone(),
            price: parse_f64(&payload[5])?,
            sold: payload[6] == "true",
            buyer_id: payload.get(7).cloned(),
        })
    }

    /// Search listings; returns (itemId, title) pairs, best match first.
    pub async fn search_items(
        &mut self,
        query: &str,
        category: &str,
        max_results: usize,
    ) -> Result<Vec<(String, String)>> {
        let max = max_results.to_string();
        let payload = self
            .request("SEARCH_ITEMS", &[query, category, &max])
            .await?;
        let rows = payload.get(1..).unwrap_or_default();
        Ok(rows
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    pub async fn user_listings(
        &mut self,
        user_id: &str,
        active_only: bool,
    ) -> Result<Vec<ListingSummary>> {
        let active = active_only.to_string();
        let payload = self
            .request("GET_USER_LISTINGS", &[user_id, &active])
            .await?;
        let rows = payload.get(1..).unwrap_or_default();
        rows.chunks_exact(4)
            .map(|row| {
                Ok(ListingSummary {
                    item_id: row[0].clone(),
                    title: row[1].clone(),
                    price: parse_f64(&row[2])?,
                    sold: row[3] == "true",
                })
            })
            .collect()
    }

    pub async fn mark_sold(&mut self, item_id: &str, buyer_id: &str) -> Result<()> {
        self.request("MARK_SOLD", &[item_id, buyer_id]).await?;
        Ok(())
    }

    pub async fn remove_item(&mut self, item_id: &str, seller_id: &str) -> Result<()> {
        self.request("REMOVE_ITEM", &[item_id, seller_id]).await?;
        Ok(())
    }

    /// Send a message, optionally in the context of an item so the server
    /// can assign buyer/seller roles for the conversation file.
    pub async fn send_message(
        &mut self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        item_id: Option<&str>,
    ) -> Result<()> {
        self.request(
            "SEND_MESSAGE",
            &[sender_id, receiver_id, content, item_id.unwrap_or("")],
        )
        .await?;
        Ok(())
    }

    pub async fn get_messages(
        &mut self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>> {
        let payload = self.request("GET_MESSAGES", &[user_a, user_b]).await?;
        let rows = payload.get(1..).unwrap_or_default();
        rows.chunks_exact(5)
            .map(|row| {
                Ok(MessageRecord {
                    message_id: row[0].clone(),
                    sender_id: row[1].clone(),
                    receiver_id: row[2].clone(),
                    timestamp: parse_u64(&row[3])?,
                    content: row[4].clone(),
                })
            })
            .collect()
    }

    /// Conversation partners as (partnerId, username) pairs.
    pub async fn get_conversations(&mut self, user_id: &str) -> Result<Vec<(String, String)>> {
        let payload = self.request("GET_CONVERSATIONS", &[user_id]).await?;
        let rows = payload.get(1..).unwrap_or_default();
        Ok(rows
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    pub async fn add_funds(&mut self, user_id: &str, amount: f64) -> Result<()> {
        let amount = fmt_decimal(amount);
        self.request("ADD_FUNDS", &[user_id, &amount]).await?;
        Ok(())
    }

    pub async fn withdraw_funds(&mut self, user_id: &str, amount: f64) -> Result<()> {
        let amount = fmt_decimal(amount);
        self.request("WITHDRAW_FUNDS", &[user_id, &amount]).await?;
        Ok(())
    }

    pub async fn process_purchase(&mut self, buyer_id: &str, item_id: &str) -> Result<()> {
        self.request("PROCESS_PURCHASE", &[buyer_id, item_id])
            .await?;
        Ok(())
    }

    pub async fn rate_seller(&mut self, seller_id: &str, rating: f64) -> Result<()> {
        let rating = fmt_decimal(rating);
        self.request("RATE_SELLER", &[seller_id, &rating]).await?;
        Ok(())
    }

    pub async fn get_rating(&mut self, seller_id: &str) -> Result<SellerRating> {
        let payload = self.request("GET_RATING", &[seller_id]).await?;
        parse_rating(&payload)
    }

    pub async fn get_my_rating(&mut self, user_id: &str) -> Result<SellerRating> {
        let payload = self.request("GET_MY_RATING", &[user_id]).await?;
        parse_rating(&payload)
    }

    /// All users as (userId, username) pairs.
    pub async fn all_users(&mut self) -> Result<Vec<(String, String)>> {
        let payload = self.request("GET_ALL_USERS", &[]).await?;
        let rows = payload.get(1..).unwrap_or_default();
        Ok(rows
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    /// Users with at least one active listing, as (userId, username) pairs.
    pub async fn active_sellers(&mut self) -> Result<Vec<(String, String)>> {
        let payload = self.request("GET_ACTIVE_SELLERS", &[]).await?;
        let rows = payload.get(1..).unwrap_or_default();
        Ok(rows
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    pub async fn balance(&mut self, user_id: &str) -> Result<f64> {
        let payload = self.request("GET_BALANCE", &[user_id]).await?;
        parse_f64(
            payload
                .first()
                .ok_or_else(|| BazaarError::Protocol("GET_BALANCE response empty".to_string()))?,
        )
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Split a response line into its SUCCESS payload, or the appropriate error.
fn parse_response(response: &str) -> Result<Vec<String>> {
    let mut parts = response.split(',');
    let command = parts.next().unwrap_or_default();
    if command == "ERROR" {
        return Err(BazaarError::Server(parts.collect::<Vec<_>>().join(",")));
    }

    match parts.next() {
        Some("SUCCESS") => Ok(parts.map(String::from).collect()),
        Some("FAILURE") => {
            let reason = parts.collect::<Vec<_>>().join(",");
            Err(BazaarError::Server(if reason.is_empty() {
                format!("{} failed", command)
            } else {
                reason
            }))
        }
        _ => Err(BazaarError::Protocol(format!(
            "Unknown response format: {}",
            response
        ))),
    }
}

fn parse_f64(raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| BazaarError::Protocol(format!("invalid number in response: {}", raw)))
}

fn parse_u64(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| BazaarError::Protocol(format!("invalid timestamp in response: {}", raw)))
}

fn parse_rating(payload: &[String]) -> Result<SellerRating> {
    match payload {
        [average, count, ..] => Ok(SellerRating {
            average: parse_f64(average)?,
            count: parse_u64(count)? as usize,
        }),
        _ => Err(BazaarError::Protocol(
            "GET_RATING response too short".to_string(),
        )),
    }
}
