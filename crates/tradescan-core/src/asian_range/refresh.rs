use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::{AsianRangeConfig, AsianRangeExtractor, AsianRangeReference, AsianRangeStore};
use crate::data_source::{CandleSource, CandlesRequest, SourceError};
use crate::{Symbol, UtcDateTime};

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RefreshReport {
    /// Symbols handed to the refresh.
    pub requested: usize,
    /// Stale symbols actually fetched.
    pub attempted: usize,
    pub updated: usize,
    pub failed: usize,
    /// Another refresh was already in flight; nothing was fetched.
    pub skipped: bool,
}

// Holds the in-flight flag for as long as it lives.
struct RefreshGuard {
    flag: Arc<AtomicBool>,
}

impl RefreshGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Keeps [`AsianRangeStore`] populated from the candle provider.
///
/// At most one refresh runs at a time; concurrent callers are turned away with a
/// `skipped` report and keep using whatever the store already holds.
pub struct AsianRangeService {
    candles: Arc<dyn CandleSource>,
    store: AsianRangeStore,
    extractor: AsianRangeExtractor,
    config: AsianRangeConfig,
    in_flight: Arc<AtomicBool>,
}

impl std::fmt::Debug for AsianRangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsianRangeService")
            .field("source", &self.candles.name())
            .field("config", &self.config)
            .field("in_flight", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl AsianRangeService {
    pub fn new(
        candles: Arc<dyn CandleSource>,
        store: AsianRangeStore,
        config: AsianRangeConfig,
    ) -> Self {
        Self {
            candles,
            store,
            extractor: config.extractor(),
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &AsianRangeStore {
        &self.store
    }

    pub fn config(&self) -> &AsianRangeConfig {
        &self.config
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn reference(&self, symbol: &Symbol) -> Option<AsianRangeReference> {
        self.store.get(symbol)
    }

    /// Recompute stale symbols, writing each result as soon as it is ready.
    ///
    /// A disabled service fetches nothing and reports zero attempts.
    pub async fn refresh(&self, symbols: &[Symbol], now: UtcDateTime) -> RefreshReport {
        if !self.config.enabled {
            return RefreshReport {
                requested: symbols.len(),
                ..RefreshReport::default()
            };
        }

        let Some(_guard) = RefreshGuard::try_acquire(&self.in_flight) else {
            tracing::debug!(requested = symbols.len(), "asian range refresh already running");
            return RefreshReport {
                requested: symbols.len(),
                skipped: true,
                ..RefreshReport::default()
            };
        };
        self.refresh_stale(symbols, now).await
    }

    /// Background variant of [`refresh`](Self::refresh).
    ///
    /// Returns `None` without spawning when disabled, when a refresh is already in
    /// flight, or when no symbol is stale.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        symbols: Vec<Symbol>,
    ) -> Option<JoinHandle<RefreshReport>> {
        if !self.config.enabled {
            return None;
        }

        let now = UtcDateTime::now();
        if self.stale(&symbols, now).is_empty() {
            return None;
        }

        let guard = RefreshGuard::try_acquire(&self.in_flight)?;
        let service = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = guard;
            service.refresh_stale(&symbols, now).await
        }))
    }

    fn stale(&self, symbols: &[Symbol], now: UtcDateTime) -> Vec<Symbol> {
        self.store.stale_symbols(
            symbols,
            now,
            self.config.max_age,
            self.config.retry_failed_after,
        )
    }

    async fn refresh_stale(&self, symbols: &[Symbol], now: UtcDateTime) -> RefreshReport {
        let stale = self.stale(symbols, now);
        let mut report = RefreshReport {
            requested: symbols.len(),
            attempted: stale.len(),
            ..RefreshReport::default()
        };
        if stale.is_empty() {
            return report;
        }

        tracing::info!(
            requested = report.requested,
            stale = report.attempted,
            "refreshing asian range references"
        );

        let mut outcomes = stream::iter(stale)
            .map(|symbol| async move {
                let outcome = self.refresh_symbol(&symbol, now).await;
                (symbol, outcome)
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some((symbol, outcome)) = outcomes.next().await {
            match outcome {
                Ok(()) => report.updated += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(%symbol, %error, "asian range refresh failed");
                }
            }
        }

        tracing::info!(
            updated = report.updated,
            failed = report.failed,
            "asian range refresh finished"
        );
        report
    }

    async fn refresh_symbol(&self, symbol: &Symbol, now: UtcDateTime) -> Result<(), SourceError> {
        let result = self.fetch_reference(symbol, now).await;
        match result {
            Ok(reference) => {
                self.store.record_success(reference, now);
                Ok(())
            }
            Err(error) => {
                self.store.record_failure(symbol, now);
                Err(error)
            }
        }
    }

    async fn fetch_reference(
        &self,
        symbol: &Symbol,
        now: UtcDateTime,
    ) -> Result<AsianRangeReference, SourceError> {
        let request = CandlesRequest::new(
            symbol.clone(),
            self.config.interval,
            self.config.candle_limit(),
        )?
        .with_timeout(self.config.fetch_timeout);
        let candles = self.candles.candles(request).await?;

        self.extractor
            .extract(symbol, &candles, now)
            .ok_or_else(|| {
                SourceError::internal(format!(
                    "no usable candles for {symbol} ({} received)",
                    candles.len()
                ))
            })
    }
}
