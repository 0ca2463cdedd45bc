//! Interactive client for the marketplace server.
//!
//! A small line-oriented shell over the wire protocol. The logged-in user id
//! is tracked here, client-side; the server itself is stateless.

use bazaar::Client;
use std::env;
use std::io::{self, Write};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let server_addr = args.get(1).cloned().unwrap_or_else(|| "127.0.0.1:7878".to_string());

    println!("Connecting to marketplace server at {}...", server_addr);
    let mut client = Client::connect(&server_addr).await?;
    println!("Connected! Type 'help' for available commands or 'quit' to exit.");

    // The id returned by a successful login; most commands need it.
    let mut user_id: Option<String> = None;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => print_help(),
            _ => {
                if let Err(e) = handle_command(&mut client, &mut user_id, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

async fn handle_command(
    client: &mut Client,
    user_id: &mut Option<String>,
    input: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    match parts.first() {
        Some(&"register") => {
            if parts.len() < 3 {
                println!("Usage: register <username> <password> [bio...]");
                return Ok(());
            }
            client
                .register(parts[1], parts[2], &parts[3..].join(" "))
                .await?;
            println!("Registered. Now log in.");
        }
        Some(&"login") => {
            if parts.len() != 3 {
                println!("Usage: login <username> <password>");
                return Ok(());
            }
            let id = client.login(parts[1], parts[2]).await?;
            println!("Logged in. User id: {}", id);
            *user_id = Some(id);
        }
        Some(&"delete-account") => {
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            client.delete_account(&id).await?;
            *user_id = None;
            println!("Account deleted.");
        }
        Some(&"list") => {
            if parts.len() < 5 {
                println!("Usage: list <title> <category> <price> <description...>");
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            let price: f64 = parts[3].parse()?;
            let item_id = client
                .add_item(&id, parts[1], &parts[4..].join(" "), parts[2], price)
                .await?;
            println!("Listed. Item id: {}", item_id);
        }
        Some(&"item") => {
            if parts.len() != 2 {
                println!("Usage: item <itemId>");
                return Ok(());
            }
            let item = client.get_item(parts[1]).await?;
            println!(
                "[{}] {} - ${} ({}) seller={} sold={}",
                item.item_id, item.title, item.price, item.category, item.seller_id, item.sold
            );
            println!("    {}", item.description);
        }
        Some(&"search") => {
            if parts.len() < 4 {
                println!("Usage: search <category|-> <maxResults> <query...>");
                return Ok(());
            }
            let category = if parts[1] == "-" { "" } else { parts[1] };
            let max_results: usize = parts[2].parse()?;
            let results = client
                .search_items(&parts[3..].join(" "), category, max_results)
                .await?;
            if results.is_empty() {
                println!("No matches.");
            }
            for (item_id, title) in results {
                println!("[{}] {}", item_id, title);
            }
        }
        Some(&"listings") => {
            let mut args: Vec<&str> = parts[1..].to_vec();
            let active_only = !args.iter().any(|arg| *arg == "all");
            args.retain(|arg| *arg != "all");
            let target = match args.first() {
                Some(id) => id.to_string(),
                None => match user_id.clone() {
                    Some(id) => id,
                    None => {
                        println!("Usage: listings [userId] [all]  (log in to omit userId)");
                        return Ok(());
                    }
                },
            };
            for listing in client.user_listings(&target, active_only).await? {
                println!(
                    "[{}] {} - ${} sold={}",
                    listing.item_id, listing.title, listing.price, listing.sold
                );
            }
        }
        Some(&"mark-sold") => {
            if parts.len() != 3 {
                println!("Usage: mark-sold <itemId> <buyerId>");
                return Ok(());
            }
            client.mark_sold(parts[1], parts[2]).await?;
            println!("OK");
        }
        Some(&"remove") => {
            if parts.len() != 2 {
                println!("Usage: remove <itemId>");
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            client.remove_item(parts[1], &id).await?;
            println!("OK");
        }
        Some(&"msg") => {
            if parts.len() < 4 {
                println!("Usage: msg <receiverId> <itemId|-> <content...>");
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            let item_id = if parts[2] == "-" { None } else { Some(parts[2]) };
            client
                .send_message(&id, parts[1], &parts[3..].join(" "), item_id)
                .await?;
            println!("Sent.");
        }
        Some(&"messages") => {
            if parts.len() != 2 {
                println!("Usage: messages <otherUserId>");
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            for message in client.get_messages(&id, parts[1]).await? {
                let direction = if message.sender_id == id { "->" } else { "<-" };
                println!("{} {}", direction, message.content);
            }
        }
        Some(&"conversations") => {
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            for (partner_id, username) in client.get_conversations(&id).await? {
                println!("{} ({})", username, partner_id);
            }
        }
        Some(&"deposit") | Some(&"withdraw") => {
            if parts.len() != 2 {
                println!("Usage: {} <amount>", parts[0]);
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            let amount: f64 = parts[1].parse()?;
            if parts[0] == "deposit" {
                client.add_funds(&id, amount).await?;
            } else {
                client.withdraw_funds(&id, amount).await?;
            }
            println!("Balance: {}", client.balance(&id).await?);
        }
        Some(&"balance") => {
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            println!("Balance: {}", client.balance(&id).await?);
        }
        Some(&"buy") => {
            if parts.len() != 2 {
                println!("Usage: buy <itemId>");
                return Ok(());
            }
            let Some(id) = user_id.clone() else {
                println!("Log in first.");
                return Ok(());
            };
            client.process_purchase(&id, parts[1]).await?;
            println!("Purchased. Balance: {}", client.balance(&id).await?);
        }
        Some(&"rate") => {
            if parts.len() != 3 {
                println!("Usage: rate <sellerId> <rating>");
                return Ok(());
            }
            let rating: f64 = parts[2].parse()?;
            client.rate_seller(parts[1], rating).await?;
            println!("Rated.");
        }
        Some(&"rating") => {
            if parts.len() != 2 {
                println!("Usage: rating <sellerId>");
                return Ok(());
            }
            let rating = client.get_rating(parts[1]).await?;
            println!("{} ({} ratings)", rating.average, rating.count);
        }
        Some(&"users") => {
            for (id, username) in client.all_users().await? {
                println!("{} ({})", username, id);
            }
        }
        Some(&"sellers") => {
            for (id, username) in client.active_sellers().await? {
                println!("{} ({})", username, id);
            }
        }
        _ => {
            println!(
                "Unknown command: {}. Type 'help' for available commands.",
                parts[0]
            );
        }
    }

    Ok(())
}

fn print_help() {
    println!("Account:");
    println!("  register <username> <password> [bio...]");
    println!("  login <username> <password>");
    println!("  delete-account");
    println!("Items:");
    println!("  list <title> <category> <price> <description...>");
    println!("  item <itemId>");
    println!("  search <category|-> <maxResults> <query...>");
    println!("  listings [userId] [all]");
    println!("  mark-sold <itemId> <buyerId>");
    println!("  remove <itemId>");
    println!("Messages:");
    println!("  msg <receiverId> <itemId|-> <content...>");
    println!("  messages <otherUserId>");
    println!("  conversations");
    println!("Funds:");
    println!("  deposit <amount> / withdraw <amount> / balance");
    println!("  buy <itemId>");
    println!("Ratings and people:");
    println!("  rate <sellerId> <rating> / rating <sellerId>");
    println!("  users / sellers");
    println!("Other:");
    println!("  help / quit");
}
