/*
[INPUT]:  Pair symbol to stream
[OUTPUT]: Live trades and one-minute candles printed to stdout
[POS]:    Examples - WebSocket stream handling
[UPDATE]: When WebSocket API changes
*/

use bitfinex_connector::*;
use tokio::time::{Duration, sleep};

/// Example: stream trades and candles for 30 seconds
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Bitfinex WebSocket Example ===\n");

    let ws = BitfinexWebSocket::new()?;

    ws.on_buy_trade(|trade| println!("BUY  {} {} @ {}", trade.pair, trade.amount, trade.price));
    ws.on_sell_trade(|trade| println!("SELL {} {} @ {}", trade.pair, trade.amount, trade.price));
    ws.on_candle(|candle| {
        println!(
            "CANDLE {} {} c={} v={}",
            candle.pair, candle.open_time, candle.close_price, candle.total_volume
        )
    });

    ws.subscribe_trades("tBTCUSD").await?;
    ws.subscribe_candles("tBTCUSD", 60).await?;
    println!("✓ Subscribed; streaming for 30 seconds...\n");

    sleep(Duration::from_secs(30)).await;

    ws.unsubscribe_trades("tBTCUSD").await;
    ws.unsubscribe_candles("tBTCUSD", 60).await;
    ws.close().await;
    println!("\n✓ WebSocket example complete");
    Ok(())
}
