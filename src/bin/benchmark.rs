//! Performance benchmarks for the marketplace server.
//!
//! Measures latency and throughput for listing, lookup, and search
//! workloads against a running server.

use bazaar::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug)]
struct BenchmarkResults {
    operation: String,
    total_operations: usize,
    duration: Duration,
    ops_per_second: f64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
}

impl BenchmarkResults {
    fn new(
        operation: String,
        total_operations: usize,
        duration: Duration,
        latencies: &mut [Duration],
    ) -> Self {
        latencies.sort();

        let ops_per_second = total_operations as f64 / duration.as_secs_f64();
        let avg_latency_ms = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>()
            / latencies.len() as f64;

        let p95_index = (latencies.len() as f64 * 0.95) as usize;
        let p99_index = (latencies.len() as f64 * 0.99) as usize;

        let p95_latency_ms = latencies.get(p95_index).unwrap_or(&Duration::ZERO).as_secs_f64() * 1000.0;
        let p99_latency_ms = latencies.get(p99_index).unwrap_or(&Duration::ZERO).as_secs_f64() * 1000.0;

        Self {
            operation,
            total_operations,
            duration,
            ops_per_second,
            avg_latency_ms,
            p95_latency_ms,
            p99_latency_ms,
        }
    }

    fn print(&self) {
        println!("=== {} Benchmark Results ===", self.operation);
        println!("Total operations: {}", self.total_operations);
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
        println!("Average latency: {:.2}ms", self.avg_latency_ms);
        println!("P95 latency: {:.2}ms", self.p95_latency_ms);
        println!("P99 latency: {:.2}ms", self.p99_latency_ms);
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string());

    println!("Marketplace Performance Benchmarks");
    println!("==================================");
    println!("Server: {}", server_addr);
    println!();

    println!("Waiting for server to be ready...");
    loop {
        if let Ok(client) = Client::connect(&server_addr).await {
            let _ = client.close().await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("Server is ready!");
    println!();

    let seller_id = register_bench_user(&server_addr, "bench_seller").await?;

    let add_results = benchmark_add_item(&server_addr, &seller_id, 2000).await?;
    add_results.print();

    let get_results = benchmark_get_item(&server_addr, &seller_id, 2000).await?;
    get_results.print();

    let search_results = benchmark_search(&server_addr, 2000).await?;
    search_results.print();

    let browse_results = benchmark_browse_workload(&server_addr, &seller_id, 2000).await?;
    browse_results.print();

    for num_clients in [10, 50] {
        let results = benchmark_concurrent_listings(&server_addr, num_clients, 200).await?;
        results.print();
    }

    Ok(())
}

/// Register (or reuse) a benchmark account and return its user id.
async fn register_bench_user(
    server_addr: &str,
    username: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut client = Client::connect(server_addr).await?;
    // Ignore the failure if a previous run already registered the account.
    let _ = client.register(username, "bench-pw", "benchmark account").await;
    let user_id = client.login(username, "bench-pw").await?;
    client.close().await?;
    Ok(user_id)
}

async fn benchmark_add_item(
    server_addr: &str,
    seller_id: &str,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let mut client = Client::connect(server_addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();

    for i in 0..num_operations {
        let title = format!("bench item {}", i);
        let description = format!("sturdy benchmark widget number {}", i);

        let op_start = Instant::now();
        client
            .add_item(seller_id, &title, &description, "Benchmarks", 9.99)
            .await?;
        latencies.push(op_start.elapsed());
    }

    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new(
        "ADD_ITEM".to_string(),
        num_operations,
        total_duration,
        &mut latencies,
    ))
}

async fn benchmark_get_item(
    server_addr: &str,
    seller_id: &str,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    // Populate a pool of items to read back.
    let mut setup_client = Client::connect(server_addr).await?;
    let mut item_ids = Vec::with_capacity(100);
    for i in 0..100 {
        let title = format!("get bench item {}", i);
        let item_id = setup_client
            .add_item(seller_id, &title, "lookup target", "Benchmarks", 5.0)
            .await?;
        item_ids.push(item_id);
    }
    setup_client.close().await?;

    let mut client = Client::connect(server_addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();

    for i in 0..num_operations {
        let item_id = &item_ids[i % item_ids.len()];

        let op_start = Instant::now();
        let _item = client.get_item(item_id).await?;
        latencies.push(op_start.elapsed());
    }

    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new(
        "GET_ITEM".to_string(),
        num_operations,
        total_duration,
        &mut latencies,
    ))
}

async fn benchmark_search(
    server_addr: &str,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let mut client = Client::connect(server_addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let queries = ["bench widget", "sturdy", "item 42", "lookup target"];

    let start = Instant::now();

    for i in 0..num_operations {
        let query = queries[i % queries.len()];

        let op_start = Instant::now();
        let _results = client.search_items(query, "Benchmarks", 10).await?;
        latencies.push(op_start.elapsed());
    }

    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new(
        "SEARCH_ITEMS".to_string(),
        num_operations,
        total_duration,
        &mut latencies,
    ))
}

async fn benchmark_browse_workload(
    server_addr: &str,
    seller_id: &str,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let mut client = Client::connect(server_addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();

    for i in 0..num_operations {
        let op_start = Instant::now();

        match i % 10 {
            // 70% searches
            0..=6 => {
                let _results = client.search_items("bench", "", 10).await?;
            }
            // 20% listing pages
            7..=8 => {
                let _listings = client.user_listings(seller_id, true).await?;
            }
            // 10% new listings
            9 => {
                let title = format!("browse bench item {}", i);
                client
                    .add_item(seller_id, &title, "mixed workload", "Benchmarks", 1.0)
                    .await?;
            }
            _ => unreachable!(),
        }

        latencies.push(op_start.elapsed());
    }

    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new(
        "Browse Workload".to_string(),
        num_operations,
        total_duration,
        &mut latencies,
    ))
}

async fn benchmark_concurrent_listings(
    server_addr: &str,
    num_clients: usize,
    ops_per_client: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let semaphore = Arc::new(Semaphore::new(num_clients));
    let mut handles = Vec::new();
    let mut all_latencies = Vec::new();

    let start = Instant::now();

    for client_id in 0..num_clients {
        let semaphore = Arc::clone(&semaphore);
        let server_addr = server_addr.to_string();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            let mut client = Client::connect(&server_addr)
                .await
                .map_err(|e| format!("Connect error: {}", e))?;

            let username = format!("bench_seller_{}", client_id);
            let _ = client
                .register(&username, "bench-pw", "concurrent benchmark account")
                .await;
            let seller_id = client
                .login(&username, "bench-pw")
                .await
                .map_err(|e| format!("Login error: {}", e))?;

            let mut latencies = Vec::with_capacity(ops_per_client);
            for i in 0..ops_per_client {
                let title = format!("client {} item {}", client_id, i);

                let op_start = Instant::now();
                client
                    .add_item(&seller_id, &title, "concurrent listing", "Benchmarks", 2.5)
                    .await
                    .map_err(|e| format!("AddItem error: {}", e))?;
                latencies.push(op_start.elapsed());
            }

            client.close().await.map_err(|e| format!("Close error: {}", e))?;
            Ok::<Vec<Duration>, String>(latencies)
        });

        handles.push(handle);
    }

    for handle in handles {
        let latencies = handle
            .await
            .map_err(|e| format!("Join error: {}", e))?
            .map_err(|e| format!("Task error: {}", e))?;
        all_latencies.extend(latencies);
    }

    let total_duration = start.elapsed();
    let total_operations = num_clients * ops_per_client;

    Ok(BenchmarkResults::new(
        format!("Concurrent ({} clients)", num_clients),
        total_operations,
        total_duration,
        &mut all_latencies,
    ))
}
