//! Marketplace TCP server.
//!
//! Accepts connections, spawns a handler task per client, and processes one
//! comma-separated command line per response line until the peer hangs up.
//! The protocol is stateless: every request carries the ids it needs, and
//! no session state lives server-side.

use crate::error::{BazaarError, Result};
use crate::model::fmt_decimal;
use crate::payment::PaymentProcessor;
use crate::protocol::{Request, Response};
use crate::search::SearchEngine;
use crate::store::Store;
use crate::tags::Lexicon;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tracing::{debug, info, warn};

/// Server configuration; loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory holding the user/item tables and conversation files.
    pub data_dir: PathBuf,
    pub stopwords_path: PathBuf,
    pub special_chars_path: PathBuf,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            data_dir: PathBuf::from("data"),
            stopwords_path: PathBuf::from("config/stopwords.txt"),
            special_chars_path: PathBuf::from("config/special_characters.txt"),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file; fields left out keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The shared request-handling surface: one store plus the components
/// wrapping it.
struct Services {
    store: Arc<Store>,
    payments: PaymentProcessor,
    search: SearchEngine,
}

/// Marketplace TCP server
pub struct MarketServer {
    config: ServerConfig,
    services: Arc<Services>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MarketServer {
    /// Create a server instance. The tag lexicon is read and the store fully
    /// loaded here, before `run` ever accepts a connection.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let lexicon = Arc::new(Lexicon::load(
            &config.stopwords_path,
            &config.special_chars_path,
        )?);
        let store = Arc::new(Store::open(config.data_dir.clone(), lexicon)?);
        let services = Arc::new(Services {
            payments: PaymentProcessor::new(Arc::clone(&store)),
            search: SearchEngine::new(Arc::clone(&store)),
            store,
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            services,
            shutdown_tx,
        })
    }

    /// Run the accept loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "marketplace server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(peer = %addr, "client connected");
                            let services = Arc::clone(&self.services);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(err) = handle_client(stream, services, shutdown_rx).await {
                                    warn!(peer = %addr, error = %err, "client handler ended with error");
                                }
                                info!(peer = %addr, "client disconnected");
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .map_err(|_| BazaarError::Server("failed to send shutdown signal".to_string()))?;
        Ok(())
    }
}

/// Handle a single client connection: read a line, dispatch, write exactly
/// one response line, repeat. EOF or a socket error ends this connection
/// only; everything else becomes a FAILURE response.
async fn handle_client(
    mut stream: TcpStream,
    services: Arc<Services>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        tokio::select! {
            result = buf_reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let response = process_line(line.trim(), &services).await;
                        writer.write_all(&response.to_bytes()).await?;
                        writer.flush().await?;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to read from client");
                        break;
                    }
                }
            }

            _ = shutdown_rx.recv() => break,
        }
    }

    Ok(())
}

/// Parse and dispatch one request line.
async fn process_line(line: &str, services: &Services) -> Response {
    match Request::parse(line) {
        Ok(request) => {
            debug!(command = request.command(), "dispatching");
            dispatch(request, services).await
        }
        Err(err) => err.into_response(),
    }
}

/// Route a request to its handler and fold the outcome into a response.
async fn dispatch(request: Request, services: &Services) -> Response {
    let command = request.command();
    let result = match request {
        Request::Register {
            username,
            password,
            bio,
        } => services
            .store
            .add_user(&username, &password, &bio)
            .await
            .map(|_| Vec::new()),

        Request::Login { username, password } => services
            .store
            .login(&username, &password)
            .await
            .map(|user_id| vec![user_id]),

        Request::DeleteAccount { user_id } => services
            .store
            .delete_user(&user_id)
            .await
            .map(|_| Vec::new()),

        Request::AddItem {
            seller_id,
            title,
            description,
            category,
            price,
        } => services
            .store
            .add_item(&seller_id, &title, &description, &category, price)
            .await
            .map(|item| vec![item.item_id]),

        Request::GetItem { item_id } => get_item(services, &item_id).await,

        Request::SearchItems {
            query,
            category,
            max_results,
        } => {
            let results = services.search.search(&query, &category, max_results).await;
            let mut payload = vec![results.len().to_string()];
            for item in results {
                payload.push(item.item_id);
                payload.push(item.title);
            }
            Ok(payload)
        }

        Request::GetUserListings {
            user_id,
            active_only,
        } => services
            .store
            .listings_for(&user_id, active_only)
            .await
            .map(|listings| {
                let mut payload = vec![listings.len().to_string()];
                for item in listings {
                    payload.push(item.item_id);
                    payload.push(item.title);
                    payload.push(fmt_decimal(item.price));
                    payload.push(item.sold.to_string());
                }
                payload
            }),

        Request::MarkSold { item_id, buyer_id } => services
            .store
            .mark_sold(&item_id, &buyer_id)
            .await
            .map(|_| Vec::new()),

        Request::RemoveItem { item_id, seller_id } => services
            .store
            .remove_item(&item_id, &seller_id)
            .await
            .map(|_| Vec::new()),

        Request::SendMessage {
            sender_id,
            receiver_id,
            content,
            item_id,
        } => services
            .store
            .add_message(&sender_id, &receiver_id, &content, item_id.as_deref())
            .await
            .map(|_| Vec::new()),

        Request::GetMessages { user_a, user_b } => {
            let messages = services.store.messages_between(&user_a, &user_b).await;
            let mut payload = vec![messages.len().to_string()];
            for message in messages {
                payload.push(message.message_id);
                payload.push(message.sender_id);
                payload.push(message.receiver_id);
                payload.push(message.timestamp.to_string());
                payload.push(message.content);
            }
            Ok(payload)
        }

        Request::GetConversations { user_id } => services
            .store
            .conversation_partners(&user_id)
            .await
            .map(|partners| {
                let mut payload = vec![partners.len().to_string()];
                for (partner_id, username) in partners {
                    payload.push(partner_id);
                    payload.push(username);
                }
                payload
            }),

        Request::AddFunds { user_id, amount } => services
            .payments
            .add_funds(&user_id, amount)
            .await
            .map(|_| Vec::new()),

        Request::WithdrawFunds { user_id, amount } => services
            .payments
            .withdraw_funds(&user_id, amount)
            .await
            .map(|_| Vec::new()),

        Request::ProcessPurchase { buyer_id, item_id } => services
            .payments
            .process_purchase(&buyer_id, &item_id)
            .await
            .map(|_| Vec::new()),

        Request::RateSeller { seller_id, rating } => services
            .payments
            .rate_seller(&seller_id, rating)
            .await
            .map(|_| Vec::new()),

        Request::GetRating { seller_id } => rating_payload(services, &seller_id).await,
        Request::GetMyRating { user_id } => rating_payload(services, &user_id).await,

        Request::GetAllUsers => Ok(user_list_payload(services.store.all_users().await)),
        Request::GetActiveSellers => {
            Ok(user_list_payload(services.store.active_sellers().await))
        }

        Request::GetBalance { user_id } => services
            .store
            .user_by_id(&user_id)
            .await
            .ok_or(BazaarError::UserNotFound)
            .map(|user| vec![fmt_decimal(user.balance)]),
    };

    match result {
        Ok(payload) => Response::success(command, payload),
        Err(err) => Response::failure(command, err.to_string()),
    }
}

async fn get_item(services: &Services, item_id: &str) -> Result<Vec<String>> {
    let item = services
        .store
        .item(item_id)
        .await
        .ok_or(BazaarError::ItemNotFound)?;

    let mut payload = vec![
        item.item_id,
        item.seller_id,
        item.title,
        item.description,
        item.category,
        fmt_decimal(item.price),
        item.sold.to_string(),
    ];
    if let Some(buyer_id) = item.buyer_id {
        payload.push(buyer_id);
    }
    Ok(payload)
}

async fn rating_payload(services: &Services, seller_id: &str) -> Result<Vec<String>> {
    let (average, count) = services.payments.seller_rating(seller_id).await?;
    Ok(vec![fmt_decimal(average), count.to_string()])
}

fn user_list_payload(users: Vec<crate::model::User>) -> Vec<String> {
    let mut payload = vec![users.len().to_string()];
    for user in users {
        payload.push(user.user_id);
        payload.push(user.username);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_services(dir: &TempDir) -> Services {
        let store = Arc::new(Store::open(dir.path(), Arc::new(Lexicon::empty())).unwrap());
        Services {
            payments: PaymentProcessor::new(Arc::clone(&store)),
            search: SearchEngine::new(Arc::clone(&store)),
            store,
        }
    }

    #[tokio::test]
    async fn test_register_login_dispatch() {
        let dir = TempDir::new().unwrap();
        let services = test_services(&dir);

        let response = process_line("REGISTER,alice,pw1,hello", &services).await;
        assert_eq!(response.to_line(), "REGISTER,SUCCESS");

        let response = process_line("REGISTER,alice,pw1,hello", &services).await;
        assert_eq!(
            response.to_line(),
            "REGISTER,FAILURE,Username already taken"
        );

        let response = process_line("LOGIN,alice,pw1", &services).await;
        let line = response.to_line();
        assert!(line.starts_with("LOGIN,SUCCESS,"), "got: {}", line);

        let response = process_line("LOGIN,alice,nope", &services).await;
        assert_eq!(response.to_line(), "LOGIN,FAILURE,Invalid credentials");
    }

    #[tokio::test]
    async fn test_listing_and_balance_dispatch() {
        let dir = TempDir::new().unwrap();
        let services = test_services(&dir);
        let alice = services.store.add_user("alice", "pw", "").await.unwrap();

        let response = process_line(
            &format!("ADD_ITEM,{},Lamp,desk lamp,Home,15.0", alice.user_id),
            &services,
        )
        .await;
        assert_eq!(response.to_line(), "ADD_ITEM,SUCCESS,1");

        let response = process_line("GET_ITEM,1", &services).await;
        assert_eq!(
            response.to_line(),
            format!("GET_ITEM,SUCCESS,1,{},Lamp,desk lamp,Home,15.0,false", alice.user_id)
        );

        let response =
            process_line(&format!("ADD_FUNDS,{},40", alice.user_id), &services).await;
        assert_eq!(response.to_line(), "ADD_FUNDS,SUCCESS");
        let response =
            process_line(&format!("GET_BALANCE,{}", alice.user_id), &services).await;
        assert_eq!(response.to_line(), "GET_BALANCE,SUCCESS,40.0");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_dispatch() {
        let dir = TempDir::new().unwrap();
        let services = test_services(&dir);

        let response = process_line("FROBNICATE,1,2", &services).await;
        assert_eq!(response.to_line(), "ERROR,Unknown command: FROBNICATE");

        let response = process_line("", &services).await;
        assert_eq!(response.to_line(), "ERROR,Empty request");

        let response = process_line("ADD_ITEM,u1,Lamp,desc,Home,free", &services).await;
        assert_eq!(response.to_line(), "ADD_ITEM,FAILURE,Invalid price");
    }

    #[test]
    fn test_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{ "bind_addr": "127.0.0.1:9999", "data_dir": "/tmp/market-data" }"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/market-data"));
        // Unset fields keep their defaults.
        assert_eq!(config.max_connections, 1000);
    }
}
