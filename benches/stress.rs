use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
// 2025-01-01T00:00:00Z
const EPOCH: i64 = 1_735_689_600_000;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("clashd")
        .user("clashd")
        .password("clashd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Venues are shared server-wide, so every run uses fresh names.
async fn create_venue(client: &tokio_postgres::Client, label: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO venues (id, name) VALUES ('{id}', 'bench {label} {id}')"
        ))
        .await
        .unwrap();
    id
}

fn insert_event(venue: Ulid, slot: i64, force: bool) -> String {
    let id = Ulid::new();
    let start = EPOCH + slot * HOUR;
    let end = start + HOUR;
    format!(
        "INSERT INTO events (id, venue_id, title, start_time, end_time, force) VALUES ('{id}', '{venue}', 'slot {slot}', {start}, {end}, {force})"
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let venue = create_venue(&client, "sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&insert_event(venue, i as i64, false))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} events in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let setup = connect(host, port).await;
    let venue = create_venue(&setup, "contended").await;
    drop(setup);

    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    // Every task races for the same slots on one venue.
    for _ in 0..n_tasks {
        let host = host.to_string();
        let accepted = accepted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for j in 0..n_per_task {
                match client.batch_execute(&insert_event(venue, j, false)).await {
                    Ok(()) => accepted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} writes = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!(
        "  accepted={} rejected={} (expected accepted={n_per_task})",
        accepted.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let venue = create_venue(&setup, "read").await;
    // Forced overlaps so the clash scan has pairs to report
    for i in 0..200 {
        setup
            .batch_execute(&insert_event(venue, i / 2, true))
            .await
            .unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let venue = create_venue(&client, &format!("writer {w}")).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&insert_event(venue, i, false)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut clash_latencies = Vec::with_capacity(reads_per_reader);
            let mut suggest_latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query("SELECT * FROM clashes WHERE date = '2025-01-02'")
                    .await
                    .unwrap();
                clash_latencies.push(t.elapsed());

                let start = EPOCH + ((r * reads_per_reader + i) as i64 % 100) * HOUR;
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM suggestions WHERE start_time = {start} AND end_time = {}",
                        start + HOUR
                    ))
                    .await
                    .unwrap();
                suggest_latencies.push(t.elapsed());
            }
            (clash_latencies, suggest_latencies)
        }));
    }

    let mut all_clashes = Vec::new();
    let mut all_suggestions = Vec::new();
    for h in reader_handles {
        let (c, s) = h.await.unwrap();
        all_clashes.extend(c);
        all_suggestions.extend(s);
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("clash report", &mut all_clashes);
    print_latency("venue suggestions", &mut all_suggestions);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let venue = create_venue(&client, &format!("storm {c}")).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&insert_event(venue, i, false))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CLASHD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CLASHD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CLASHD_PORT");

    println!("=== clashd stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended writes on one venue");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
