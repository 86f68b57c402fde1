//! # Seed Data Generator
//!
//! Populates a development database with stock levels and open carts so the
//! settlement and queue paths have something to work on.
//!
//! ## Usage
//! ```bash
//! # 50 products, 20 carts (default)
//! cargo run -p beacon-db --bin seed
//!
//! # Custom amounts
//! cargo run -p beacon-db --bin seed -- --products 200 --carts 100
//!
//! # Specify database path
//! cargo run -p beacon-db --bin seed -- --db ./data/beacon.db
//! ```
//!
//! Every cart has one to three lines drawn from the seeded products, priced
//! $0.99 - $19.99, on terminals 1-3.

use beacon_core::CartLine;
use beacon_db::{Database, DbConfig, NewCart};
use std::env;

const DEFAULT_PRODUCTS: i64 = 50;
const DEFAULT_CARTS: usize = 20;
const TERMINALS: i64 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut products = DEFAULT_PRODUCTS;
    let mut carts = DEFAULT_CARTS;
    let mut db_path = String::from("./beacon_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--products" | "-p" => {
                if i + 1 < args.len() {
                    products = args[i + 1].parse().unwrap_or(DEFAULT_PRODUCTS).max(1);
                    i += 1;
                }
            }
            "--carts" | "-c" => {
                if i + 1 < args.len() {
                    carts = args[i + 1].parse().unwrap_or(DEFAULT_CARTS);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Beacon POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --products <N>  Products with stock levels (default: 50)");
                println!("  -c, --carts <N>     Open carts to create (default: 20)");
                println!("  -d, --db <PATH>     Database file path (default: ./beacon_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Beacon POS Seed Data Generator");
    println!("==============================");
    println!("Database: {}", db_path);
    println!("Products: {}", products);
    println!("Carts:    {}", carts);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let start = std::time::Instant::now();

    for product_id in 1..=products {
        db.stock().set_level(product_id, 20 + (product_id * 7) % 81).await?;
    }
    println!("✓ Stock levels set for {} products", products);

    let mut created = 0;
    for seed in 0..carts {
        let cart = NewCart {
            terminal_id: 1 + (seed as i64 % TERMINALS),
            cashier_id: 100 + (seed as i64 % 5),
            lines: generate_lines(seed, products),
            discount_cents: if seed % 4 == 0 { 100 } else { 0 },
        };

        match db.carts().create(cart).await {
            Ok(_) => created += 1,
            Err(e) => eprintln!("Failed to create cart {}: {}", seed, e),
        }
    }

    let elapsed = start.elapsed();
    println!("✓ Created {} carts in {:?}", created, elapsed);
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// One to three lines over distinct products.
fn generate_lines(seed: usize, products: i64) -> Vec<CartLine> {
    let count = 1 + seed % 3;
    (0..count)
        .map(|n| {
            let mix = (seed * 31 + n * 17) as i64;
            CartLine {
                product_id: 1 + (mix + n as i64) % products,
                quantity: 1 + mix % 3,
                unit_price_cents: 99 + (mix * 53) % 1900,
            }
        })
        .fold(Vec::new(), |mut lines, line| {
            if !lines.iter().any(|l: &CartLine| l.product_id == line.product_id) {
                lines.push(line);
            }
            lines
        })
}
