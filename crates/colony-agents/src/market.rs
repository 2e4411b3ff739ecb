use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use colony_core::{sleep_until_cancelled, Agent};
use colony_dispatch::{DispatchError, DispatchTask, Dispatcher};
use colony_state::StateStore;
use colony_types::{AlertSeverity, ArbitrageOpportunity, MarketSnapshot};

use crate::ERROR_PAUSE;

/// A 24h move beyond this magnitude raises a `price_move` alert.
const PRICE_ALERT_PCT: f64 = 10.0;
/// Spreads below this are noise, not opportunities.
const MIN_PROFIT_PCT: f64 = 0.5;

/// Market intelligence: polls token prices and venue quotes, keeps the
/// market collection current, and records both live and feed-derived
/// arbitrage opportunities.
pub struct MarketAgent {
    state: StateStore,
    dispatcher: Dispatcher,
    tokens: Vec<String>,
    pairs: Vec<(String, Vec<String>)>,
    poll_interval: Duration,
}

impl MarketAgent {
    pub fn new(
        state: StateStore,
        dispatcher: Dispatcher,
        tokens: Vec<String>,
        pairs: Vec<(String, Vec<String>)>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            dispatcher,
            tokens,
            pairs,
            poll_interval,
        }
    }

    async fn update_prices(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        for token in &self.tokens {
            let task = DispatchTask::new("colony_getTokenPrice", json!([token]))
                .attempt_timeout(Duration::from_secs(10));
            let success = match self.dispatcher.dispatch(task, cancel).await {
                Ok(success) => success,
                Err(DispatchError::Cancelled) => return Ok(()),
                Err(err) => {
                    warn!(token, %err, "price fetch failed");
                    continue;
                }
            };
            let Some(price) = success.result["price_usd"]
                .as_f64()
                .or_else(|| success.result.as_f64())
            else {
                continue;
            };
            let change_24h = success.result["change_24h"].as_f64();
            let snapshot = MarketSnapshot {
                token: token.clone(),
                price_usd: price,
                change_24h,
                volume_24h: success.result["volume_24h"].as_f64(),
                source: success.endpoint.clone(),
                timestamp: Utc::now(),
            };
            if let Err(err) = self.state.put_market(snapshot).await {
                warn!(token, %err, "snapshot rejected");
                continue;
            }
            if let Some(change) = change_24h {
                if change.abs() >= PRICE_ALERT_PCT {
                    self.state
                        .add_alert(
                            "price_move",
                            json!({ "token": token, "change_24h": change }),
                            AlertSeverity::Warning,
                        )
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Compare venue quotes per pair; cross-venue gaps become live
    /// opportunities, venue-vs-feed gaps become simulated ones.
    async fn check_spreads(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        for (pair, venues) in &self.pairs {
            let mut quotes: Vec<(String, f64)> = Vec::new();
            for venue in venues {
                let task = DispatchTask::new("dex_getQuote", json!([pair, venue]))
                    .attempt_timeout(Duration::from_secs(10));
                match self.dispatcher.dispatch(task, cancel).await {
                    Ok(success) => {
                        if let Some(price) = success.result["price"]
                            .as_f64()
                            .or_else(|| success.result.as_f64())
                        {
                            quotes.push((venue.clone(), price));
                        }
                    }
                    Err(DispatchError::Cancelled) => return Ok(()),
                    Err(err) => debug!(pair, venue, %err, "quote fetch failed"),
                }
            }

            if let Some(op) = best_cross_venue(pair, &quotes) {
                if op.profit_pct >= MIN_PROFIT_PCT {
                    self.state.add_arbitrage(op).await;
                }
            }

            // Feed comparison: the pair's base token snapshot against the
            // best venue quote. Indicative only, flagged as simulated.
            let base = pair.split('/').next().unwrap_or(pair);
            if let Some(feed) = self.state.market(base).await {
                for (venue, price) in &quotes {
                    let profit_pct = (feed.price_usd - price) / price * 100.0;
                    if profit_pct.abs() >= MIN_PROFIT_PCT {
                        self.state
                            .add_arbitrage(ArbitrageOpportunity {
                                pair: pair.clone(),
                                buy_venue: venue.clone(),
                                sell_venue: feed.source.clone(),
                                buy_price: *price,
                                sell_price: feed.price_usd,
                                profit_pct: profit_pct.abs(),
                                simulated: true,
                                detected_at: Utc::now(),
                            })
                            .await;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Best buy-low/sell-high combination across venues for one pair.
fn best_cross_venue(pair: &str, quotes: &[(String, f64)]) -> Option<ArbitrageOpportunity> {
    if quotes.len() < 2 {
        return None;
    }
    let (buy_venue, buy_price) = quotes
        .iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let (sell_venue, sell_price) = quotes
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    if buy_venue == sell_venue || *buy_price <= 0.0 {
        return None;
    }
    Some(ArbitrageOpportunity {
        pair: pair.to_string(),
        buy_venue: buy_venue.clone(),
        sell_venue: sell_venue.clone(),
        buy_price: *buy_price,
        sell_price: *sell_price,
        profit_pct: (sell_price - buy_price) / buy_price * 100.0,
        simulated: false,
        detected_at: Utc::now(),
    })
}

#[async_trait]
impl Agent for MarketAgent {
    fn name(&self) -> &str {
        "market"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            let iteration = async {
                self.update_prices(&cancel).await?;
                self.check_spreads(&cancel).await
            };
            if let Err(err) = iteration.await {
                self.state
                    .add_alert(
                        "market_agent_error",
                        json!({ "error": format!("{err:#}") }),
                        AlertSeverity::Error,
                    )
                    .await;
                if sleep_until_cancelled(&cancel, ERROR_PAUSE).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            if sleep_until_cancelled(&cancel, self.poll_interval)
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_venue_picks_cheapest_buy_and_richest_sell() {
        let quotes = vec![
            ("ekubo".to_string(), 100.0),
            ("jediswap".to_string(), 102.0),
            ("myswap".to_string(), 101.0),
        ];
        let op = best_cross_venue("ETH/USDC", &quotes).unwrap();
        assert_eq!(op.buy_venue, "ekubo");
        assert_eq!(op.sell_venue, "jediswap");
        assert!((op.profit_pct - 2.0).abs() < 0.01);
        assert!(!op.simulated);
    }

    #[test]
    fn single_quote_is_not_an_opportunity() {
        let quotes = vec![("ekubo".to_string(), 100.0)];
        assert!(best_cross_venue("ETH/USDC", &quotes).is_none());
    }
}
