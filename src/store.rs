//! The authoritative in-memory domain store with flat-file persistence.
//!
//! One `Store` instance is shared by every connection handler. All reads and
//! writes go through a single `tokio::sync::Mutex`, and the file rewrite for
//! a mutation happens while that lock is held, so each operation is atomic
//! with respect to the rest of the server. Serializing persistence I/O
//! behind the lock trades throughput for correctness: no lost updates, no
//! double sell.
//!
//! On-disk layout, one record per line, comma-separated, no escaping:
//! - `users.txt`: username,password,bio,balance,userId,active;...,bought;...,sold;...
//! - `items.txt`: itemId,sellerId,title,description,category,price,sold,buyerId
//! - `buyer_<buyerId>_seller_<sellerId>.txt`: `senderId:content` per message
//!
//! The trailing id lists in the user file are derived data, written for
//! format compatibility and ignored on load; active/bought/sold views are
//! always recomputed from the item table.

use crate::error::{BazaarError, Result};
use crate::model::{fmt_decimal, Item, Message, User};
use crate::tags::{extract_tags, Lexicon};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const USER_FILE: &str = "users.txt";
const ITEM_FILE: &str = "items.txt";

/// The shared domain store.
pub struct Store {
    state: Mutex<State>,
    dir: PathBuf,
    lexicon: Arc<Lexicon>,
}

/// Everything behind the lock.
#[derive(Default)]
pub(crate) struct State {
    /// Users keyed by username; `user_ids` maps userId back to username.
    users: BTreeMap<String, User>,
    user_ids: HashMap<String, String>,
    /// Items keyed by numeric id, which doubles as creation order.
    pub(crate) items: BTreeMap<u64, Item>,
    next_item_id: u64,
    messages: Vec<Message>,
    /// userId -> role key (`buying_from_<id>` / `selling_to_<id>`) -> file name.
    conversations: HashMap<String, HashMap<String, String>>,
    last_timestamp: u64,
}

impl State {
    pub(crate) fn user_by_id(&self, user_id: &str) -> Option<&User> {
        self.user_ids
            .get(user_id)
            .and_then(|username| self.users.get(username))
    }

    pub(crate) fn user_by_id_mut(&mut self, user_id: &str) -> Option<&mut User> {
        let username = self.user_ids.get(user_id)?.clone();
        self.users.get_mut(&username)
    }

    pub(crate) fn parse_item_key(item_id: &str) -> Option<u64> {
        item_id.trim().parse().ok()
    }

    /// Millisecond timestamps, strictly monotonic across the store so
    /// message ordering is total even within one millisecond.
    fn next_timestamp(&mut self) -> u64 {
        let ts = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    /// The conversation file for a buyer/seller pair, registering the
    /// role-keyed index entries on both sides if the pair is new.
    fn conversation_file(&mut self, buyer_id: &str, seller_id: &str) -> String {
        let buying_key = format!("buying_from_{}", seller_id);
        if let Some(name) = self
            .conversations
            .get(buyer_id)
            .and_then(|convs| convs.get(&buying_key))
        {
            return name.clone();
        }

        let file_name = format!("buyer_{}_seller_{}.txt", buyer_id, seller_id);
        self.conversations
            .entry(buyer_id.to_string())
            .or_default()
            .insert(buying_key, file_name.clone());
        self.conversations
            .entry(seller_id.to_string())
            .or_default()
            .insert(format!("selling_to_{}", buyer_id), file_name.clone());
        file_name
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn partner_of(role_key: &str) -> Option<&str> {
    role_key
        .strip_prefix("buying_from_")
        .or_else(|| role_key.strip_prefix("selling_to_"))
}

impl Store {
    /// Open the store, loading the user and item tables and rebuilding the
    /// conversation index. Runs before the listener accepts anything.
    pub fn open(dir: impl Into<PathBuf>, lexicon: Arc<Lexicon>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut state = State::default();
        load_users(&dir, &mut state);
        load_items(&dir, &mut state, &lexicon);
        load_conversations(&dir, &mut state);
        state.next_item_id = state.items.keys().next_back().copied().unwrap_or(0) + 1;

        info!(
            users = state.users.len(),
            items = state.items.len(),
            messages = state.messages.len(),
            "store loaded"
        );

        Ok(Self {
            state: Mutex::new(state),
            dir,
            lexicon,
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().await
    }

    /// Rewrite both tables. Callers hold the state lock, so the files always
    /// reflect a single consistent snapshot.
    pub(crate) fn persist(&self, state: &State) -> Result<()> {
        self.persist_users(state)?;
        self.persist_items(state)
    }

    pub(crate) fn persist_users(&self, state: &State) -> Result<()> {
        let lines = state
            .users
            .values()
            .map(|user| user_line(user, state))
            .collect::<Vec<_>>();
        write_table(&self.dir.join(USER_FILE), &lines)
    }

    pub(crate) fn persist_items(&self, state: &State) -> Result<()> {
        let lines = state.items.values().map(item_line).collect::<Vec<_>>();
        write_table(&self.dir.join(ITEM_FILE), &lines)
    }

    /// Create a user. Fails if the username is already taken.
    pub async fn add_user(&self, username: &str, password: &str, bio: &str) -> Result<User> {
        let mut state = self.lock().await;
        if state.users.contains_key(username) {
            return Err(BazaarError::UsernameTaken);
        }

        let user = User::new(username, password, bio);
        state
            .user_ids
            .insert(user.user_id.clone(), username.to_string());
        state.users.insert(username.to_string(), user.clone());

        if let Err(err) = self.persist_users(&state) {
            state.users.remove(username);
            state.user_ids.remove(&user.user_id);
            return Err(err);
        }
        Ok(user)
    }

    /// Validate credentials and return the user's stable id.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let state = self.lock().await;
        state
            .users
            .get(username)
            .filter(|user| user.validate_password(password))
            .map(|user| user.user_id.clone())
            .ok_or(BazaarError::InvalidCredentials)
    }

    pub async fn user_by_id(&self, user_id: &str) -> Option<User> {
        self.lock().await.user_by_id(user_id).cloned()
    }

    pub async fn user_by_username(&self, username: &str) -> Option<User> {
        self.lock().await.users.get(username).cloned()
    }

    pub async fn all_users(&self) -> Vec<User> {
        self.lock().await.users.values().cloned().collect()
    }

    /// Users with at least one active listing, derived from the item table.
    pub async fn active_sellers(&self) -> Vec<User> {
        let state = self.lock().await;
        state
            .users
            .values()
            .filter(|user| {
                state
                    .items
                    .values()
                    .any(|item| item.seller_id == user.user_id && !item.sold)
            })
            .cloned()
            .collect()
    }

    /// Insert a new listing for an existing seller and return it. Item ids
    /// come from a counter held under the store lock, so they cannot collide
    /// under concurrent creation.
    pub async fn add_item(
        &self,
        seller_id: &str,
        title: &str,
        description: &str,
        category: &str,
        price: f64,
    ) -> Result<Item> {
        let mut state = self.lock().await;
        if state.user_by_id(seller_id).is_none() {
            return Err(BazaarError::SellerNotFound);
        }

        let key = state.next_item_id;
        let tags = extract_tags(description, &self.lexicon);
        let item = Item::new(
            key.to_string(),
            seller_id,
            title,
            description,
            category,
            price,
            tags,
        );
        state.items.insert(key, item.clone());
        state.next_item_id = key + 1;

        if let Err(err) = self.persist(&state) {
            state.items.remove(&key);
            state.next_item_id = key;
            return Err(err);
        }
        Ok(item)
    }

    pub async fn item(&self, item_id: &str) -> Option<Item> {
        let state = self.lock().await;
        State::parse_item_key(item_id).and_then(|key| state.items.get(&key).cloned())
    }

    /// All items in creation order.
    pub async fn all_items(&self) -> Vec<Item> {
        self.lock().await.items.values().cloned().collect()
    }

    /// Unsold items in creation order.
    pub async fn active_items(&self) -> Vec<Item> {
        self.lock()
            .await
            .items
            .values()
            .filter(|item| !item.sold)
            .cloned()
            .collect()
    }

    /// A user's listings, derived from the item table.
    pub async fn listings_for(&self, user_id: &str, active_only: bool) -> Result<Vec<Item>> {
        let state = self.lock().await;
        if state.user_by_id(user_id).is_none() {
            return Err(BazaarError::UserNotFound);
        }
        Ok(state
            .items
            .values()
            .filter(|item| item.seller_id == user_id && (!active_only || !item.sold))
            .cloned()
            .collect())
    }

    /// Remove a listing. Only the seller may remove it, and only while it is
    /// unsold; sold items are immutable historical records.
    pub async fn remove_item(&self, item_id: &str, requester_id: &str) -> Result<()> {
        let mut state = self.lock().await;
        let key = State::parse_item_key(item_id).ok_or(BazaarError::ItemNotFound)?;
        {
            let item = state.items.get(&key).ok_or(BazaarError::ItemNotFound)?;
            if item.seller_id != requester_id {
                return Err(BazaarError::NotSeller);
            }
            if item.sold {
                return Err(BazaarError::AlreadySold);
            }
        }

        let removed = state.items.remove(&key);
        if let Err(err) = self.persist(&state) {
            if let Some(item) = removed {
                state.items.insert(key, item);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Mark an item sold outside the payment flow (an off-platform sale).
    pub async fn mark_sold(&self, item_id: &str, buyer_id: &str) -> Result<()> {
        let mut state = self.lock().await;
        if state.user_by_id(buyer_id).is_none() {
            return Err(BazaarError::UserNotFound);
        }
        let key = State::parse_item_key(item_id).ok_or(BazaarError::ItemNotFound)?;
        {
            let item = state.items.get_mut(&key).ok_or(BazaarError::ItemNotFound)?;
            if !item.mark_sold(buyer_id) {
                return Err(BazaarError::AlreadySold);
            }
        }

        if let Err(err) = self.persist(&state) {
            if let Some(item) = state.items.get_mut(&key) {
                item.sold = false;
                item.buyer_id = None;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Delete an account and cascade: unsold listings disappear, the user's
    /// conversation files and index entries are removed, and in-memory
    /// messages involving the user are dropped. Sold items and other users'
    /// purchase histories survive as historical records, even though their
    /// seller reference no longer resolves.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut state = self.lock().await;
        let username = state
            .user_ids
            .get(user_id)
            .cloned()
            .ok_or(BazaarError::UserNotFound)?;

        let saved_user = state.users.get(&username).cloned();
        let removed_listings: Vec<(u64, Item)> = state
            .items
            .iter()
            .filter(|(_, item)| item.seller_id == user_id && !item.sold)
            .map(|(key, item)| (*key, item.clone()))
            .collect();

        for (key, _) in &removed_listings {
            state.items.remove(key);
        }
        state.users.remove(&username);
        state.user_ids.remove(user_id);

        if let Err(err) = self.persist(&state) {
            if let Some(user) = saved_user {
                state.user_ids.insert(user_id.to_string(), username.clone());
                state.users.insert(username, user);
            }
            for (key, item) in removed_listings {
                state.items.insert(key, item);
            }
            return Err(err);
        }

        // Tables are durable; now drop conversations and messages.
        state
            .messages
            .retain(|m| m.sender_id != user_id && m.receiver_id != user_id);
        if let Some(convs) = state.conversations.remove(user_id) {
            for file_name in convs.values() {
                let path = self.dir.join(file_name);
                if path.exists() {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(file = %path.display(), error = %err, "failed to delete conversation file");
                    }
                }
            }
        }
        for convs in state.conversations.values_mut() {
            convs.retain(|key, _| partner_of(key) != Some(user_id));
        }
        Ok(())
    }

    /// Record a message between two existing users. Roles are derived from
    /// the referenced item's seller when an item id is given, and default to
    /// (sender=buyer, receiver=seller) otherwise. The conversation file is
    /// appended before the message becomes visible in memory.
    pub async fn add_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        item_id: Option<&str>,
    ) -> Result<Message> {
        let mut state = self.lock().await;
        if state.user_by_id(sender_id).is_none() || state.user_by_id(receiver_id).is_none() {
            return Err(BazaarError::UserNotFound);
        }

        let (buyer_id, seller_id) = match item_id {
            Some(id) => {
                let key = State::parse_item_key(id).ok_or(BazaarError::ItemNotFound)?;
                let item = state.items.get(&key).ok_or(BazaarError::ItemNotFound)?;
                if item.seller_id == sender_id {
                    (receiver_id.to_string(), sender_id.to_string())
                } else {
                    (sender_id.to_string(), receiver_id.to_string())
                }
            }
            None => (sender_id.to_string(), receiver_id.to_string()),
        };

        let file_name = state.conversation_file(&buyer_id, &seller_id);
        let path = self.dir.join(&file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}:{}", sender_id, content)?;

        let timestamp = state.next_timestamp();
        let message = Message::new(sender_id, receiver_id, content, timestamp);
        state.messages.push(message.clone());
        Ok(message)
    }

    /// All messages exchanged between two users, oldest first. The sort is
    /// stable, so equal timestamps keep arrival order.
    pub async fn messages_between(&self, user_a: &str, user_b: &str) -> Vec<Message> {
        let state = self.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.involves(user_a, user_b))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    /// Conversation partners from the role-keyed index, with usernames.
    /// Partners that no longer resolve to a live user are skipped.
    pub async fn conversation_partners(&self, user_id: &str) -> Result<Vec<(String, String)>> {
        let state = self.lock().await;
        if state.user_by_id(user_id).is_none() {
            return Err(BazaarError::UserNotFound);
        }

        let mut partner_ids: Vec<String> = state
            .conversations
            .get(user_id)
            .map(|convs| {
                convs
                    .keys()
                    .filter_map(|key| partner_of(key).map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        partner_ids.sort();
        partner_ids.dedup();

        Ok(partner_ids
            .into_iter()
            .filter_map(|partner_id| {
                let username = state.user_by_id(&partner_id)?.username.clone();
                Some((partner_id, username))
            })
            .collect())
    }
}

fn user_line(user: &User, state: &State) -> String {
    let active = join_ids(
        state
            .items
            .values()
            .filter(|item| item.seller_id == user.user_id && !item.sold),
    );
    let bought = join_ids(
        state
            .items
            .values()
            .filter(|item| item.buyer_id.as_deref() == Some(user.user_id.as_str())),
    );
    let sold = join_ids(
        state
            .items
            .values()
            .filter(|item| item.seller_id == user.user_id && item.sold),
    );
    format!(
        "{},{},{},{},{},{},{},{}",
        user.username,
        user.password,
        user.bio,
        fmt_decimal(user.balance),
        user.user_id,
        active,
        bought,
        sold
    )
}

fn join_ids<'a>(items: impl Iterator<Item = &'a Item>) -> String {
    items
        .map(|item| item.item_id.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

fn item_line(item: &Item) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        item.item_id,
        item.seller_id,
        item.title,
        item.description,
        item.category,
        fmt_decimal(item.price),
        item.sold,
        item.buyer_id.as_deref().unwrap_or_default()
    )
}

/// Rewrite a table through a temp file and rename, so a failed write never
/// truncates the previous version.
fn write_table(path: &Path, lines: &[String]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for line in lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load the user table. Tolerant of malformed lines: they are logged and
/// skipped, matching the recover-what-you-can startup contract.
fn load_users(dir: &Path, state: &mut State) {
    let path = dir.join(USER_FILE);
    let file = match File::open(&path) {
        Ok(file) => file,
        // First run: nothing to load yet.
        Err(_) => return,
    };

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(file = USER_FILE, error = %err, "stopping user load on read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 5 {
            warn!(file = USER_FILE, line = line_no + 1, "skipping malformed user record");
            continue;
        }
        let balance = fields[3].parse().unwrap_or_else(|_| {
            warn!(user = fields[0], "invalid balance, defaulting to 0");
            0.0
        });
        let user = User {
            user_id: fields[4].to_string(),
            username: fields[0].to_string(),
            password: fields[1].to_string(),
            bio: fields[2].to_string(),
            balance,
        };
        // Trailing id-list columns are derived data; views come from the
        // item table instead.
        state
            .user_ids
            .insert(user.user_id.clone(), user.username.clone());
        state.users.insert(user.username.clone(), user);
    }
}

fn load_items(dir: &Path, state: &mut State, lexicon: &Lexicon) {
    let path = dir.join(ITEM_FILE);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(_) => return,
    };

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(file = ITEM_FILE, error = %err, "stopping item load on read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 6 {
            warn!(file = ITEM_FILE, line = line_no + 1, "skipping malformed item record");
            continue;
        }
        let Some(key) = State::parse_item_key(fields[0]) else {
            warn!(item = fields[0], "skipping item with non-numeric id");
            continue;
        };
        let Ok(price) = fields[5].parse::<f64>() else {
            warn!(item = fields[0], "skipping item with invalid price");
            continue;
        };
        let sold = fields.get(6).map(|s| s.trim() == "true").unwrap_or(false);
        let buyer_id = if sold {
            fields.get(7).filter(|s| !s.is_empty()).map(|s| s.to_string())
        } else {
            None
        };

        let item = Item {
            item_id: fields[0].to_string(),
            seller_id: fields[1].to_string(),
            title: fields[2].to_string(),
            description: fields[3].to_string(),
            category: fields[4].to_string(),
            tags: extract_tags(fields[3], lexicon),
            price,
            rating: 0.0,
            sold,
            buyer_id,
        };
        state.items.insert(key, item);
    }
}

/// Scan the data directory for conversation files, rebuild the role-keyed
/// index for both participants, and replay messages into memory with
/// synthesized timestamps that preserve file order.
fn load_conversations(dir: &Path, state: &mut State) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "failed to scan conversation files");
            return;
        }
    };

    let mut timestamp = now_millis().saturating_sub(10_000);
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some((buyer_id, seller_id)) = parse_conversation_name(&file_name) else {
            continue;
        };

        state
            .conversations
            .entry(buyer_id.clone())
            .or_default()
            .insert(format!("buying_from_{}", seller_id), file_name.clone());
        state
            .conversations
            .entry(seller_id.clone())
            .or_default()
            .insert(format!("selling_to_{}", buyer_id), file_name.clone());

        let file = match File::open(entry.path()) {
            Ok(file) => file,
            Err(err) => {
                warn!(file = %file_name, error = %err, "failed to read conversation file");
                continue;
            }
        };
        for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
            let Some((sender_id, content)) = line.split_once(':') else {
                continue;
            };
            if sender_id.is_empty() {
                continue;
            }
            let receiver_id = if sender_id == buyer_id {
                seller_id.as_str()
            } else {
                buyer_id.as_str()
            };
            state
                .messages
                .push(Message::new(sender_id, receiver_id, content, timestamp));
            timestamp += 1;
        }
    }
    state.last_timestamp = state.last_timestamp.max(timestamp);
}

fn parse_conversation_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".txt")?;
    let rest = stem.strip_prefix("buyer_")?;
    let (buyer_id, seller_id) = rest.split_once("_seller_")?;
    if buyer_id.is_empty() || seller_id.is_empty() {
        return None;
    }
    Some((buyer_id.to_string(), seller_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(dir.path(), Arc::new(Lexicon::empty())).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let alice = store.add_user("alice", "pw1", "hi").await.unwrap();
        assert!(matches!(
            store.add_user("alice", "other", "bio").await,
            Err(BazaarError::UsernameTaken)
        ));

        assert_eq!(store.login("alice", "pw1").await.unwrap(), alice.user_id);
        assert!(matches!(
            store.login("alice", "wrong").await,
            Err(BazaarError::InvalidCredentials)
        ));
        assert!(matches!(
            store.login("bob", "pw1").await,
            Err(BazaarError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_item_ids_are_sequential() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();

        let first = store
            .add_item(&alice.user_id, "Lamp", "desk lamp", "Home", 15.0)
            .await
            .unwrap();
        let second = store
            .add_item(&alice.user_id, "Chair", "oak chair", "Home", 40.0)
            .await
            .unwrap();
        assert_eq!(first.item_id, "1");
        assert_eq!(second.item_id, "2");

        assert!(matches!(
            store.add_item("nobody", "X", "y", "z", 1.0).await,
            Err(BazaarError::SellerNotFound)
        ));
    }

    #[tokio::test]
    async fn test_remove_item_rules() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();
        let bob = store.add_user("bob", "pw", "").await.unwrap();
        let item = store
            .add_item(&alice.user_id, "Lamp", "desc", "Home", 15.0)
            .await
            .unwrap();

        assert!(matches!(
            store.remove_item(&item.item_id, &bob.user_id).await,
            Err(BazaarError::NotSeller)
        ));
        assert!(matches!(
            store.remove_item("99", &alice.user_id).await,
            Err(BazaarError::ItemNotFound)
        ));

        store.mark_sold(&item.item_id, &bob.user_id).await.unwrap();
        assert!(matches!(
            store.remove_item(&item.item_id, &alice.user_id).await,
            Err(BazaarError::AlreadySold)
        ));
    }

    #[tokio::test]
    async fn test_mark_sold_only_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();
        let bob = store.add_user("bob", "pw", "").await.unwrap();
        let carol = store.add_user("carol", "pw", "").await.unwrap();
        let item = store
            .add_item(&alice.user_id, "Lamp", "desc", "Home", 15.0)
            .await
            .unwrap();

        store.mark_sold(&item.item_id, &bob.user_id).await.unwrap();
        assert!(matches!(
            store.mark_sold(&item.item_id, &carol.user_id).await,
            Err(BazaarError::AlreadySold)
        ));

        let sold = store.item(&item.item_id).await.unwrap();
        assert!(sold.sold);
        assert_eq!(sold.buyer_id.as_deref(), Some(bob.user_id.as_str()));
        assert!(store.active_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let (alice_id, item_id);
        {
            let store = open_store(&dir);
            let alice = store.add_user("alice", "pw1", "seller of lamps").await.unwrap();
            let bob = store.add_user("bob", "pw2", "buyer").await.unwrap();
            let lamp = store
                .add_item(&alice.user_id, "Lamp", "a bright lamp", "Home", 15.0)
                .await
                .unwrap();
            store
                .add_item(&alice.user_id, "Chair", "oak chair", "Home", 40.0)
                .await
                .unwrap();
            store.mark_sold(&lamp.item_id, &bob.user_id).await.unwrap();
            alice_id = alice.user_id;
            item_id = lamp.item_id;
        }

        let reopened = open_store(&dir);
        let users = reopened.all_users().await;
        assert_eq!(users.len(), 2);
        let alice = reopened.user_by_id(&alice_id).await.unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.bio, "seller of lamps");

        let items = reopened.all_items().await;
        assert_eq!(items.len(), 2);
        let lamp = reopened.item(&item_id).await.unwrap();
        assert!(lamp.sold);
        assert_eq!(lamp.price, 15.0);
        assert_eq!(lamp.tags, vec!["a", "bright", "lamp"]);

        // The id counter resumes past the highest persisted id.
        let next = reopened
            .add_item(&alice_id, "Desk", "desc", "Home", 5.0)
            .await
            .unwrap();
        assert_eq!(next.item_id, "3");
    }

    #[tokio::test]
    async fn test_messages_and_conversation_reload() {
        let dir = TempDir::new().unwrap();
        let (alice_id, bob_id);
        {
            let store = open_store(&dir);
            let alice = store.add_user("alice", "pw", "").await.unwrap();
            let bob = store.add_user("bob", "pw", "").await.unwrap();
            let item = store
                .add_item(&alice.user_id, "Lamp", "desc", "Home", 15.0)
                .await
                .unwrap();

            // Bob asks about the lamp; alice answers through the same item.
            store
                .add_message(&bob.user_id, &alice.user_id, "still available?", Some(&item.item_id))
                .await
                .unwrap();
            store
                .add_message(&alice.user_id, &bob.user_id, "yes it is", Some(&item.item_id))
                .await
                .unwrap();
            alice_id = alice.user_id;
            bob_id = bob.user_id;
        }

        let file = dir
            .path()
            .join(format!("buyer_{}_seller_{}.txt", bob_id, alice_id));
        let contents = fs::read_to_string(file).unwrap();
        assert_eq!(
            contents,
            format!("{}:still available?\n{}:yes it is\n", bob_id, alice_id)
        );

        let reopened = open_store(&dir);
        let messages = reopened.messages_between(&alice_id, &bob_id).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "still available?");
        assert_eq!(messages[0].sender_id, bob_id);
        assert_eq!(messages[1].content, "yes it is");
        assert!(messages[0].timestamp < messages[1].timestamp);

        let partners = reopened.conversation_partners(&bob_id).await.unwrap();
        assert_eq!(partners, vec![(alice_id.clone(), "alice".to_string())]);
    }

    #[tokio::test]
    async fn test_message_requires_existing_parties() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();

        assert!(matches!(
            store.add_message(&alice.user_id, "ghost", "hi", None).await,
            Err(BazaarError::UserNotFound)
        ));
        assert!(matches!(
            store
                .add_message(&alice.user_id, &alice.user_id, "hi", Some("42"))
                .await,
            Err(BazaarError::ItemNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_user_cascade() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();
        let bob = store.add_user("bob", "pw", "").await.unwrap();

        let sold = store
            .add_item(&alice.user_id, "Lamp", "desc", "Home", 15.0)
            .await
            .unwrap();
        let active = store
            .add_item(&alice.user_id, "Chair", "desc", "Home", 40.0)
            .await
            .unwrap();
        store.mark_sold(&sold.item_id, &bob.user_id).await.unwrap();
        store
            .add_message(&bob.user_id, &alice.user_id, "hello", None)
            .await
            .unwrap();

        store.delete_user(&alice.user_id).await.unwrap();

        assert!(store.user_by_id(&alice.user_id).await.is_none());
        assert!(store.user_by_username("alice").await.is_none());
        // The unsold listing is gone; the sold item survives as history.
        assert!(store.item(&active.item_id).await.is_none());
        let survivor = store.item(&sold.item_id).await.unwrap();
        assert!(survivor.sold);

        assert!(store.messages_between(&alice.user_id, &bob.user_id).await.is_empty());
        assert_eq!(store.conversation_partners(&bob.user_id).await.unwrap(), vec![]);
        let conv_file = dir
            .path()
            .join(format!("buyer_{}_seller_{}.txt", bob.user_id, alice.user_id));
        assert!(!conv_file.exists());

        assert!(matches!(
            store.delete_user(&alice.user_id).await,
            Err(BazaarError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_active_sellers_and_listings() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let alice = store.add_user("alice", "pw", "").await.unwrap();
        let bob = store.add_user("bob", "pw", "").await.unwrap();
        let lamp = store
            .add_item(&alice.user_id, "Lamp", "desc", "Home", 15.0)
            .await
            .unwrap();
        store
            .add_item(&alice.user_id, "Chair", "desc", "Home", 40.0)
            .await
            .unwrap();

        let sellers = store.active_sellers().await;
        assert_eq!(sellers.len(), 1);
        assert_eq!(sellers[0].username, "alice");

        store.mark_sold(&lamp.item_id, &bob.user_id).await.unwrap();
        let all = store.listings_for(&alice.user_id, false).await.unwrap();
        assert_eq!(all.len(), 2);
        let active = store.listings_for(&alice.user_id, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Chair");

        assert!(matches!(
            store.listings_for("ghost", true).await,
            Err(BazaarError::UserNotFound)
        ));
    }
}
