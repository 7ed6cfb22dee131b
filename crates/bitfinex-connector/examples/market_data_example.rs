/*
[INPUT]:  Pair symbol (e.g., "tBTCUSD")
[OUTPUT]: Recent trades and hourly candles
[POS]:    Examples - historical market data queries
[UPDATE]: When adding new market data endpoints
*/

use bitfinex_connector::*;
use chrono::{Duration, Utc};

/// Example: fetch feed history over REST (public, no authentication)
#[tokio::main]
async fn main() {
    println!("=== Bitfinex Market Data Example ===\n");

    let client = match BitfinexClient::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };

    let pair = "tBTCUSD";

    println!("Fetching last 5 trades for {}...", pair);
    match client.get_trades(pair, 5).await {
        Ok(trades) => {
            for trade in trades {
                println!(
                    "  {} {:>4} {} @ {}",
                    trade.time,
                    trade.side.as_str(),
                    trade.amount,
                    trade.price
                );
            }
        }
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\nFetching hourly candles for the last 6 hours...");
    let end = Utc::now();
    let query = CandleQuery::new().start(end - Duration::hours(6)).end(end).limit(6);
    match client.get_candles(pair, 3600, &query).await {
        Ok(candles) => {
            for candle in candles {
                println!(
                    "  {} o={} h={} l={} c={} v={}",
                    candle.open_time,
                    candle.open_price,
                    candle.high_price,
                    candle.low_price,
                    candle.close_price,
                    candle.total_volume
                );
            }
        }
        Err(e) => println!("✗ Error: {}", e),
    }

    // Unsupported periods are rejected before any request is made.
    if let Err(e) = client.get_candles(pair, 42, &CandleQuery::default()).await {
        println!("\n✓ Rejected as expected: {}", e);
    }
}
