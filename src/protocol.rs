//! Wire protocol codec for the marketplace.
//!
//! Requests are single lines: a command name followed by comma-separated
//! fields, with no quoting or escaping (embedded commas in free text corrupt
//! the frame; a known compatibility constraint). Responses are single lines
//! of the form `<COMMAND>,SUCCESS[,payload...]`, `<COMMAND>,FAILURE,<reason>`
//! or `ERROR,<message>`. All raw field splitting lives here so handlers only
//! ever see typed requests.

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::opt,
    multi::separated_list0,
    sequence::preceded,
    IResult,
};

/// A fully decoded request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Register { username: String, password: String, bio: String },
    Login { username: String, password: String },
    DeleteAccount { user_id: String },
    AddItem { seller_id: String, title: String, description: String, category: String, price: f64 },
    GetItem { item_id: String },
    SearchItems { query: String, category: String, max_results: usize },
    GetUserListings { user_id: String, active_only: bool },
    MarkSold { item_id: String, buyer_id: String },
    RemoveItem { item_id: String, seller_id: String },
    SendMessage { sender_id: String, receiver_id: String, content: String, item_id: Option<String> },
    GetMessages { user_a: String, user_b: String },
    GetConversations { user_id: String },
    AddFunds { user_id: String, amount: f64 },
    WithdrawFunds { user_id: String, amount: f64 },
    ProcessPurchase { buyer_id: String, item_id: String },
    RateSeller { seller_id: String, rating: f64 },
    GetRating { seller_id: String },
    GetMyRating { user_id: String },
    GetAllUsers,
    GetActiveSellers,
    GetBalance { user_id: String },
}

/// Why a request line could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Empty or structurally unparseable line.
    Malformed,
    /// Command word is not in the table.
    UnknownCommand(String),
    /// Known command with missing or invalid fields.
    Invalid { command: &'static str, reason: String },
}

impl RequestError {
    /// The conventional response for a bad request.
    pub fn into_response(self) -> Response {
        match self {
            RequestError::Malformed => Response::Error {
                message: "Empty request".to_string(),
            },
            RequestError::UnknownCommand(name) => Response::Error {
                message: format!("Unknown command: {}", name),
            },
            RequestError::Invalid { command, reason } => Response::failure(command, reason),
        }
    }
}

/// One response line, ready to serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success { command: String, payload: Vec<String> },
    Failure { command: String, reason: String },
    Error { message: String },
}

impl Response {
    pub fn success(command: &str, payload: Vec<String>) -> Self {
        Response::Success {
            command: command.to_string(),
            payload,
        }
    }

    pub fn failure(command: &str, reason: impl Into<String>) -> Self {
        Response::Failure {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Response::Success { command, payload } if payload.is_empty() => {
                format!("{},SUCCESS", command)
            }
            Response::Success { command, payload } => {
                format!("{},SUCCESS,{}", command, payload.join(","))
            }
            Response::Failure { command, reason } => format!("{},FAILURE,{}", command, reason),
            Response::Error { message } => format!("ERROR,{}", message),
        }
    }

    /// Serialize for network transmission, newline-terminated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_line().into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

fn is_field_char(c: char) -> bool {
    c != ',' && c != '\r' && c != '\n'
}

/// Split a line into the command word and its raw fields.
fn line_parser(input: &str) -> IResult<&str, (&str, Vec<&str>)> {
    let (input, command) = take_while1(is_field_char)(input)?;
    let (input, fields) = opt(preceded(
        char(','),
        separated_list0(char(','), take_while(is_field_char)),
    ))(input)?;
    Ok((input, (command, fields.unwrap_or_default())))
}

fn need(command: &'static str, fields: &[&str], count: usize) -> Result<(), RequestError> {
    if fields.len() < count {
        return Err(RequestError::Invalid {
            command,
            reason: "Invalid parameters".to_string(),
        });
    }
    Ok(())
}

fn field_f64(command: &'static str, raw: &str, what: &str) -> Result<f64, RequestError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| RequestError::Invalid {
            command,
            reason: format!("Invalid {}", what),
        })
}

impl Request {
    /// Parse one request line (without its trailing newline).
    pub fn parse(line: &str) -> Result<Request, RequestError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(RequestError::Malformed);
        }
        let (_, (command, fields)) = line_parser(line).map_err(|_| RequestError::Malformed)?;
        Self::decode(command, &fields)
    }

    fn decode(command: &str, f: &[&str]) -> Result<Request, RequestError> {
        match command {
            "REGISTER" => {
                need("REGISTER", f, 3)?;
                Ok(Request::Register {
                    username: f[0].to_string(),
                    password: f[1].to_string(),
                    bio: f[2].to_string(),
                })
            }
            "LOGIN" => {
                need("LOGIN", f, 2)?;
                Ok(Request::Login {
                    username: f[0].to_string(),
                    password: f[1].to_string(),
                })
            }
            "DELETE_ACCOUNT" => {
                need("DELETE_ACCOUNT", f, 1)?;
                Ok(Request::DeleteAccount {
                    user_id: f[0].to_string(),
                })
            }
            "ADD_ITEM" => {
                need("ADD_ITEM", f, 5)?;
                let price = field_f64("ADD_ITEM", f[4], "price")?;
                if price < 0.0 {
                    return Err(RequestError::Invalid {
                        command: "ADD_ITEM",
                        reason: "Invalid price".to_string(),
                    });
                }
                Ok(Request::AddItem {
                    seller_id: f[0].to_string(),
                    title: f[1].to_string(),
                    description: f[2].to_string(),
                    category: f[3].to_string(),
                    price,
                })
            }
            "GET_ITEM" => {
                need("GET_ITEM", f, 1)?;
                Ok(Request::GetItem {
                    item_id: f[0].to_string(),
                })
            }
            "SEARCH_ITEMS" => {
                need("SEARCH_ITEMS", f, 1)?;
                let max_results = match f.get(2).copied().filter(|raw| !raw.is_empty()) {
                    Some(raw) => raw.trim().parse::<usize>().map_err(|_| RequestError::Invalid {
                        command: "SEARCH_ITEMS",
                        reason: "Invalid maxResults".to_string(),
                    })?,
                    None => 10,
                };
                Ok(Request::SearchItems {
                    query: f[0].to_string(),
                    category: f.get(1).copied().unwrap_or_default().to_string(),
                    max_results,
                })
            }
            "GET_USER_LISTINGS" => {
                need("GET_USER_LISTINGS", f, 2)?;
                Ok(Request::GetUserListings {
                    user_id: f[0].to_string(),
                    active_only: f[1].eq_ignore_ascii_case("true"),
                })
            }
            "MARK_SOLD" => {
                need("MARK_SOLD", f, 2)?;
                Ok(Request::MarkSold {
                    item_id: f[0].to_string(),
                    buyer_id: f[1].to_string(),
                })
            }
            "REMOVE_ITEM" => {
                need("REMOVE_ITEM", f, 2)?;
                Ok(Request::RemoveItem {
                    item_id: f[0].to_string(),
                    seller_id: f[1].to_string(),
                })
            }
            "SEND_MESSAGE" => {
                need("SEND_MESSAGE", f, 4)?;
                Ok(Request::SendMessage {
                    sender_id: f[0].to_string(),
                    receiver_id: f[1].to_string(),
                    content: f[2].to_string(),
                    item_id: f
                        .get(3)
                        .copied()
                        .filter(|raw| !raw.is_empty())
                        .map(String::from),
                })
            }
            "GET_MESSAGES" => {
                need("GET_MESSAGES", f, 2)?;
                Ok(Request::GetMessages {
                    user_a: f[0].to_string(),
                    user_b: f[1].to_string(),
                })
            }
            "GET_CONVERSATIONS" => {
                need("GET_CONVERSATIONS", f, 1)?;
                Ok(Request::GetConversations {
                    user_id: f[0].to_string(),
                })
            }
            "ADD_FUNDS" => {
                need("ADD_FUNDS", f, 2)?;
                Ok(Request::AddFunds {
                    user_id: f[0].to_string(),
                    amount: field_f64("ADD_FUNDS", f[1], "amount")?,
                })
            }
            "WITHDRAW_FUNDS" => {
                need("WITHDRAW_FUNDS", f, 2)?;
                Ok(Request::WithdrawFunds {
                    user_id: f[0].to_string(),
                    amount: field_f64("WITHDRAW_FUNDS", f[1], "amount")?,
                })
            }
            "PROCESS_PURCHASE" => {
                need("PROCESS_PURCHASE", f, 2)?;
                Ok(Request::ProcessPurchase {
                    buyer_id: f[0].to_string(),
                    item_id: f[1].to_string(),
                })
            }
            "RATE_SELLER" => {
                need("RATE_SELLER", f, 2)?;
                Ok(Request::RateSeller {
                    seller_id: f[0].to_string(),
                    rating: field_f64("RATE_SELLER", f[1], "rating")?,
                })
            }
            "GET_RATING" => {
                need("GET_RATING", f, 1)?;
                Ok(Request::GetRating {
                    seller_id: f[0].to_string(),
                })
            }
            "GET_MY_RATING" => {
                need("GET_MY_RATING", f, 1)?;
                Ok(Request::GetMyRating {
                    user_id: f[0].to_string(),
                })
            }
            "GET_ALL_USERS" => Ok(Request::GetAllUsers),
            "GET_ACTIVE_SELLERS" => Ok(Request::GetActiveSellers),
            "GET_BALANCE" => {
                need("GET_BALANCE", f, 1)?;
                Ok(Request::GetBalance {
                    user_id: f[0].to_string(),
                })
            }
            other => Err(RequestError::UnknownCommand(other.to_string())),
        }
    }

    /// The wire name of this request's command.
    pub fn command(&self) -> &'static str {
        match self {
            Request::Register { .. } => "REGISTER",
            Request::Login { .. } => "LOGIN",
            Request::DeleteAccount { .. } => "DELETE_ACCOUNT",
            Request::AddItem { .. } => "ADD_ITEM",
            Request::GetItem { .. } => "GET_ITEM",
            Request::SearchItems { .. } => "SEARCH_ITEMS",
            Request::GetUserListings { .. } => "GET_USER_LISTINGS",
            Request::MarkSold { .. } => "MARK_SOLD",
            Request::RemoveItem { .. } => "REMOVE_ITEM",
            Request::SendMessage { .. } => "SEND_MESSAGE",
            Request::GetMessages { .. } => "GET_MESSAGES",
            Request::GetConversations { .. } => "GET_CONVERSATIONS",
            Request::AddFunds { .. } => "ADD_FUNDS",
            Request::WithdrawFunds { .. } => "WITHDRAW_FUNDS",
            Request::ProcessPurchase { .. } => "PROCESS_PURCHASE",
            Request::RateSeller { .. } => "RATE_SELLER",
            Request::GetRating { .. } => "GET_RATING",
            Request::GetMyRating { .. } => "GET_MY_RATING",
            Request::GetAllUsers => "GET_ALL_USERS",
            Request::GetActiveSellers => "GET_ACTIVE_SELLERS",
            Request::GetBalance { .. } => "GET_BALANCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        let request = Request::parse("REGISTER,alice,pw1,hello there").unwrap();
        assert_eq!(
            request,
            Request::Register {
                username: "alice".to_string(),
                password: "pw1".to_string(),
                bio: "hello there".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_add_item() {
        let request = Request::parse("ADD_ITEM,u1,Lamp,a desk lamp,Home,15.0").unwrap();
        assert_eq!(
            request,
            Request::AddItem {
                seller_id: "u1".to_string(),
                title: "Lamp".to_string(),
                description: "a desk lamp".to_string(),
                category: "Home".to_string(),
                price: 15.0,
            }
        );
    }

    #[test]
    fn test_parse_add_item_rejects_bad_price() {
        let err = Request::parse("ADD_ITEM,u1,Lamp,desc,Home,cheap").unwrap_err();
        assert_eq!(
            err,
            RequestError::Invalid {
                command: "ADD_ITEM",
                reason: "Invalid price".to_string(),
            }
        );

        let err = Request::parse("ADD_ITEM,u1,Lamp,desc,Home,-3").unwrap_err();
        assert_eq!(
            err,
            RequestError::Invalid {
                command: "ADD_ITEM",
                reason: "Invalid price".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_search_defaults() {
        // Category and maxResults may be omitted or left empty.
        assert_eq!(
            Request::parse("SEARCH_ITEMS,lamp").unwrap(),
            Request::SearchItems {
                query: "lamp".to_string(),
                category: String::new(),
                max_results: 10,
            }
        );
        assert_eq!(
            Request::parse("SEARCH_ITEMS,lamp,,5").unwrap(),
            Request::SearchItems {
                query: "lamp".to_string(),
                category: String::new(),
                max_results: 5,
            }
        );
    }

    #[test]
    fn test_parse_send_message_optional_item() {
        let request = Request::parse("SEND_MESSAGE,u1,u2,hi,").unwrap();
        assert_eq!(
            request,
            Request::SendMessage {
                sender_id: "u1".to_string(),
                receiver_id: "u2".to_string(),
                content: "hi".to_string(),
                item_id: None,
            }
        );

        let request = Request::parse("SEND_MESSAGE,u1,u2,hi,7").unwrap();
        assert!(matches!(request, Request::SendMessage { item_id: Some(id), .. } if id == "7"));
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = Request::parse("LOGIN,alice").unwrap_err();
        assert_eq!(
            err,
            RequestError::Invalid {
                command: "LOGIN",
                reason: "Invalid parameters".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = Request::parse("FROBNICATE,x").unwrap_err();
        assert_eq!(err, RequestError::UnknownCommand("FROBNICATE".to_string()));
        assert_eq!(
            err.into_response().to_line(),
            "ERROR,Unknown command: FROBNICATE"
        );
    }

    #[test]
    fn test_parse_no_field_commands() {
        assert_eq!(Request::parse("GET_ALL_USERS").unwrap(), Request::GetAllUsers);
        assert_eq!(
            Request::parse("GET_ACTIVE_SELLERS").unwrap(),
            Request::GetActiveSellers
        );
    }

    #[test]
    fn test_response_serialization() {
        assert_eq!(
            Response::success("REGISTER", vec![]).to_line(),
            "REGISTER,SUCCESS"
        );
        assert_eq!(
            Response::success("LOGIN", vec!["u-123".to_string()]).to_line(),
            "LOGIN,SUCCESS,u-123"
        );
        assert_eq!(
            Response::failure("PROCESS_PURCHASE", "Insufficient funds").to_line(),
            "PROCESS_PURCHASE,FAILURE,Insufficient funds"
        );
        assert_eq!(
            Response::success("REGISTER", vec![]).to_bytes(),
            b"REGISTER,SUCCESS\n"
        );
    }
}
