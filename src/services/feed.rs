//! Price Feed Adapter
//!
//! Normalizes an external price source into per-market tick events. Each
//! market gets a bounded queue drained serially by its own worker task, so
//! per-market ordering is preserved while markets proceed in parallel. When
//! a queue overflows the oldest tick is dropped; the engine re-evaluates
//! against the newest prices rather than queueing without bound.

use crate::types::PriceTick;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Consumer of dispatched ticks. The trigger engine implements this.
pub trait TickConsumer: Send + Sync + 'static {
    fn on_tick(&self, tick: &PriceTick);
}

/// Latest known price per market.
pub struct PriceBoard {
    prices: DashMap<String, (f64, i64)>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    pub fn update(&self, ticker: &str, price: f64, timestamp: i64) {
        self.prices.insert(ticker.to_uppercase(), (price, timestamp));
    }

    /// Current price for a market, if any tick has arrived.
    pub fn price(&self, ticker: &str) -> Option<f64> {
        self.prices.get(&ticker.to_uppercase()).map(|e| e.0)
    }

    /// Current price with its source timestamp.
    pub fn price_with_timestamp(&self, ticker: &str) -> Option<(f64, i64)> {
        self.prices.get(&ticker.to_uppercase()).map(|e| *e)
    }

    /// Drop a market's price (delisted market or stale source).
    pub fn remove(&self, ticker: &str) {
        self.prices.remove(&ticker.to_uppercase());
    }
}

impl Default for PriceBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded per-market tick queue with drop-oldest overflow.
struct MarketQueue {
    ticks: Mutex<VecDeque<PriceTick>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl MarketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            ticks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, tick: PriceTick) {
        {
            let mut ticks = self.ticks.lock().unwrap();
            if ticks.len() >= self.capacity {
                ticks.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    warn!(
                        "Feed queue overflow for {} ({} ticks dropped so far)",
                        tick.ticker, dropped
                    );
                }
            }
            ticks.push_back(tick);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<PriceTick> {
        self.ticks.lock().unwrap().pop_front()
    }
}

/// Price feed adapter: price board plus per-market dispatch queues.
pub struct PriceFeed {
    board: Arc<PriceBoard>,
    queues: DashMap<String, Arc<MarketQueue>>,
    queue_capacity: usize,
    consumer: Arc<RwLock<Option<Arc<dyn TickConsumer>>>>,
}

impl PriceFeed {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            board: Arc::new(PriceBoard::new()),
            queues: DashMap::new(),
            queue_capacity,
            consumer: Arc::new(RwLock::new(None)),
        })
    }

    pub fn board(&self) -> Arc<PriceBoard> {
        self.board.clone()
    }

    /// Attach the tick consumer. Ticks ingested before this are only
    /// reflected on the board.
    pub fn attach_consumer(&self, consumer: Arc<dyn TickConsumer>) {
        *self.consumer.write().unwrap() = Some(consumer);
    }

    /// Ingest a normalized tick: update the board and dispatch to the
    /// market's worker. Must be called from within a tokio runtime.
    pub fn ingest(&self, tick: PriceTick) {
        self.board.update(&tick.ticker, tick.price, tick.timestamp);

        if self.consumer.read().unwrap().is_none() {
            return;
        }

        let queue = self
            .queues
            .entry(tick.ticker.clone())
            .or_insert_with(|| {
                let queue = Arc::new(MarketQueue::new(self.queue_capacity));
                self.spawn_worker(tick.ticker.clone(), queue.clone());
                queue
            })
            .clone();
        queue.push(tick);
    }

    /// Per-market worker: drains the queue serially, so ticks for one
    /// market are never processed concurrently.
    fn spawn_worker(&self, ticker: String, queue: Arc<MarketQueue>) {
        let consumer = self.consumer.clone();
        tokio::spawn(async move {
            debug!("Feed worker started for {}", ticker);
            loop {
                match queue.pop() {
                    Some(tick) => {
                        let current = consumer.read().unwrap().clone();
                        if let Some(current) = current {
                            current.on_tick(&tick);
                        }
                    }
                    None => queue.notify.notified().await,
                }
            }
        });
    }
}

/// One tick row from the upstream HTTP source.
#[derive(Debug, Deserialize)]
struct SourceTick {
    coin: String,
    price: f64,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Poll an upstream HTTP price source and ingest its tick batches.
/// Delivery gaps are logged and recovery is simply the next poll; nothing
/// is replayed.
pub async fn run_http_source(feed: Arc<PriceFeed>, url: String, poll_ms: u64) {
    let client = reqwest::Client::new();
    info!("Price source polling {} every {}ms", url, poll_ms);

    loop {
        match client.get(&url).send().await {
            Ok(response) => match response.json::<Vec<SourceTick>>().await {
                Ok(ticks) => {
                    for tick in ticks {
                        let timestamp = tick
                            .timestamp
                            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                        feed.ingest(PriceTick::new(tick.coin, tick.price, timestamp));
                    }
                }
                Err(e) => warn!("Price source returned bad payload: {}", e),
            },
            Err(e) => warn!("Price source poll failed: {}", e),
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(poll_ms)).await;
    }
}
