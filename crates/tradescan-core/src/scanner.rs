//! Scanner: the market snapshot enriched with Fibonacci analysis and Asian-range
//! references, filtered and sorted per request.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::asian_range::{AsianRangeReference, AsianRangeService};
use crate::data_source::{MarketSnapshotSource, MarketsRequest, MAX_MARKETS_PAGE};
use crate::error::{CoreError, ValidationError};
use crate::fibonacci::{self, FibonacciAnalysis};
use crate::{AssetSnapshot, Symbol, UtcDateTime};

pub const DEFAULT_SCAN_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Page size of the base snapshot every scan starts from.
    pub snapshot_size: usize,
    pub snapshot_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            snapshot_size: MAX_MARKETS_PAGE,
            snapshot_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Rank,
    Volume,
    MarketCap,
    #[serde(rename = "change_24h")]
    Change24h,
    FibPosition,
}

impl SortKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rank => "rank",
            Self::Volume => "volume",
            Self::MarketCap => "market_cap",
            Self::Change24h => "change_24h",
            Self::FibPosition => "fib_position",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rank" => Ok(Self::Rank),
            "volume" => Ok(Self::Volume),
            "market_cap" => Ok(Self::MarketCap),
            "change_24h" => Ok(Self::Change24h),
            "fib_position" => Ok(Self::FibPosition),
            _ => Err(ValidationError::InvalidSortKey {
                value: value.to_owned(),
            }),
        }
    }
}

/// Inclusive bounds. Unset bounds do not filter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_volume: Option<f64>,
    /// Also excludes assets without a market cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_change_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_change_24h: Option<f64>,
    /// Fibonacci bounds exclude assets without an analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_fib_position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fib_position: Option<f64>,
}

impl ScanFilters {
    pub fn has_fibonacci_filter(&self) -> bool {
        self.min_fib_position.is_some() || self.max_fib_position.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let bounds = [
            ("min_volume", self.min_volume),
            ("min_market_cap", self.min_market_cap),
            ("min_change_24h", self.min_change_24h),
            ("max_change_24h", self.max_change_24h),
            ("min_fib_position", self.min_fib_position),
            ("max_fib_position", self.max_fib_position),
        ];
        for (field, value) in bounds {
            if value.is_some_and(|value| !value.is_finite()) {
                return Err(ValidationError::NonFiniteValue { field });
            }
        }

        check_ordered("change_24h", self.min_change_24h, self.max_change_24h)?;
        check_ordered("fib_position", self.min_fib_position, self.max_fib_position)
    }

    pub fn matches(&self, asset: &EnrichedAsset) -> bool {
        let snapshot = &asset.snapshot;
        let position = asset
            .fibonacci_analysis
            .as_ref()
            .map(|analysis| analysis.position_percentage);

        at_least(Some(snapshot.volume_24h), self.min_volume)
            && at_least(snapshot.market_cap, self.min_market_cap)
            && at_least(Some(snapshot.price_change_24h), self.min_change_24h)
            && at_most(Some(snapshot.price_change_24h), self.max_change_24h)
            && at_least(position, self.min_fib_position)
            && at_most(position, self.max_fib_position)
    }
}

fn check_ordered(
    field: &'static str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), ValidationError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => {
            Err(ValidationError::InvertedFilterBounds { field, min, max })
        }
        _ => Ok(()),
    }
}

fn at_least(value: Option<f64>, bound: Option<f64>) -> bool {
    bound.map_or(true, |bound| value.is_some_and(|value| value >= bound))
}

fn at_most(value: Option<f64>, bound: Option<f64>) -> bool {
    bound.map_or(true, |bound| value.is_some_and(|value| value <= bound))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    pub limit: usize,
    pub include_fibonacci: bool,
    pub filters: ScanFilters,
    pub sort: SortKey,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SCAN_LIMIT,
            include_fibonacci: false,
            filters: ScanFilters::default(),
            sort: SortKey::Rank,
        }
    }
}

impl ScanRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limit == 0 || self.limit > MAX_MARKETS_PAGE {
            return Err(ValidationError::InvalidLimit {
                value: self.limit,
                max: MAX_MARKETS_PAGE,
            });
        }
        self.filters.validate()
    }

    fn needs_fibonacci(&self) -> bool {
        self.include_fibonacci
            || self.filters.has_fibonacci_filter()
            || self.sort == SortKey::FibPosition
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedAsset {
    #[serde(flatten)]
    pub snapshot: AssetSnapshot,
    pub fibonacci_analysis: Option<FibonacciAnalysis>,
    pub asian_range: Option<AsianRangeReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub total_coins: usize,
    pub coins: Vec<EnrichedAsset>,
    /// Assets whose Fibonacci analysis failed; they are still listed with a null analysis.
    pub failures: usize,
    pub timestamp: UtcDateTime,
    pub filters_applied: ScanFilters,
    pub sort: SortKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AthAtl {
    pub symbol: Symbol,
    pub ath: f64,
    pub ath_date: Option<UtcDateTime>,
    pub atl: f64,
    pub atl_date: Option<UtcDateTime>,
    pub current_price: f64,
}

#[derive(Clone)]
pub struct Scanner {
    markets: Arc<dyn MarketSnapshotSource>,
    asian_range: Option<Arc<AsianRangeService>>,
    config: ScannerConfig,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("markets", &self.markets.name())
            .field("asian_range", &self.asian_range.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl Scanner {
    pub fn new(markets: Arc<dyn MarketSnapshotSource>, config: ScannerConfig) -> Self {
        Self {
            markets,
            asian_range: None,
            config,
        }
    }

    pub fn with_asian_range(mut self, service: Arc<AsianRangeService>) -> Self {
        self.asian_range = Some(service);
        self
    }

    pub fn asian_range(&self) -> Option<&Arc<AsianRangeService>> {
        self.asian_range.as_ref()
    }

    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResult, CoreError> {
        request.validate()?;

        let mut snapshots = self.snapshot().await?;
        snapshots.truncate(request.limit);
        self.trigger_refresh(snapshots.iter().map(|snapshot| snapshot.symbol.clone()).collect());

        let with_fibonacci = request.needs_fibonacci();
        let mut failures = 0;
        let mut coins: Vec<EnrichedAsset> = snapshots
            .into_iter()
            .map(|snapshot| {
                let (asset, failed) = self.enrich(snapshot, with_fibonacci);
                failures += usize::from(failed);
                asset
            })
            .filter(|asset| request.filters.matches(asset))
            .collect();

        sort_assets(&mut coins, request.sort);

        tracing::info!(
            limit = request.limit,
            returned = coins.len(),
            failures,
            sort = %request.sort,
            fibonacci = with_fibonacci,
            "scan completed"
        );

        Ok(ScanResult {
            total_coins: coins.len(),
            coins,
            failures,
            timestamp: UtcDateTime::now(),
            filters_applied: request.filters,
            sort: request.sort,
        })
    }

    pub async fn find(
        &self,
        symbol: &str,
        include_fibonacci: bool,
    ) -> Result<EnrichedAsset, CoreError> {
        let snapshot = self.find_snapshot(symbol).await?;
        self.trigger_refresh(vec![snapshot.symbol.clone()]);
        Ok(self.enrich(snapshot, include_fibonacci).0)
    }

    pub async fn fibonacci(&self, symbol: &str) -> Result<FibonacciAnalysis, CoreError> {
        let snapshot = self.find_snapshot(symbol).await?;
        let (ath, atl) = snapshot.ath_atl().ok_or_else(|| CoreError::AnalysisUnavailable {
            symbol: snapshot.symbol.to_string(),
            what: "fibonacci analysis",
        })?;
        Ok(fibonacci::analyze(snapshot.symbol, ath, atl, snapshot.current_price)?)
    }

    pub async fn ath_atl(&self, symbol: &str) -> Result<AthAtl, CoreError> {
        let snapshot = self.find_snapshot(symbol).await?;
        let (ath, atl) = snapshot.ath_atl().ok_or_else(|| CoreError::AnalysisUnavailable {
            symbol: snapshot.symbol.to_string(),
            what: "ATH/ATL data",
        })?;
        Ok(AthAtl {
            symbol: snapshot.symbol,
            ath,
            ath_date: snapshot.ath_date,
            atl,
            atl_date: snapshot.atl_date,
            current_price: snapshot.current_price,
        })
    }

    /// Full base snapshot ordered by rank; unranked assets keep provider order at the end.
    async fn snapshot(&self) -> Result<Vec<AssetSnapshot>, CoreError> {
        let request = MarketsRequest::new(self.config.snapshot_size)?
            .with_timeout(self.config.snapshot_timeout);
        let mut snapshots = self.markets.markets(request).await.map_err(|error| {
            tracing::error!(source = self.markets.name(), %error, "market snapshot fetch failed");
            error
        })?;
        snapshots.sort_by(|a, b| compare_rank(a.market_cap_rank, b.market_cap_rank));
        Ok(snapshots)
    }

    async fn find_snapshot(&self, symbol: &str) -> Result<AssetSnapshot, CoreError> {
        let symbol = Symbol::parse(symbol)?;
        self.snapshot()
            .await?
            .into_iter()
            .find(|snapshot| snapshot.symbol == symbol)
            .ok_or_else(|| CoreError::NotFound {
                symbol: symbol.to_string(),
            })
    }

    // Returns the enriched asset and whether the Fibonacci engine rejected it.
    fn enrich(&self, snapshot: AssetSnapshot, with_fibonacci: bool) -> (EnrichedAsset, bool) {
        let mut failed = false;
        let fibonacci_analysis = if with_fibonacci {
            snapshot.ath_atl().and_then(|(ath, atl)| {
                let symbol = snapshot.symbol.clone();
                match fibonacci::analyze(symbol, ath, atl, snapshot.current_price) {
                    Ok(analysis) => Some(analysis),
                    Err(error) => {
                        failed = true;
                        tracing::warn!(
                            symbol = %snapshot.symbol,
                            coin_id = snapshot.coin_id,
                            %error,
                            "fibonacci analysis failed"
                        );
                        None
                    }
                }
            })
        } else {
            None
        };

        let asian_range = self
            .asian_range
            .as_ref()
            .and_then(|service| service.reference(&snapshot.symbol));

        (
            EnrichedAsset {
                snapshot,
                fibonacci_analysis,
                asian_range,
            },
            failed,
        )
    }

    fn trigger_refresh(&self, symbols: Vec<Symbol>) {
        let Some(service) = &self.asian_range else {
            return;
        };
        if service.spawn_refresh(symbols).is_none() {
            tracing::debug!("asian range refresh not started");
        }
    }
}

fn sort_assets(assets: &mut [EnrichedAsset], key: SortKey) {
    match key {
        SortKey::Rank => {
            assets.sort_by(|a, b| {
                compare_rank(a.snapshot.market_cap_rank, b.snapshot.market_cap_rank)
            });
        }
        SortKey::Volume => {
            assets.sort_by(|a, b| {
                compare_desc(Some(a.snapshot.volume_24h), Some(b.snapshot.volume_24h))
            });
        }
        SortKey::MarketCap => {
            assets.sort_by(|a, b| compare_desc(a.snapshot.market_cap, b.snapshot.market_cap));
        }
        SortKey::Change24h => {
            assets.sort_by(|a, b| {
                compare_desc(Some(a.snapshot.price_change_24h), Some(b.snapshot.price_change_24h))
            });
        }
        SortKey::FibPosition => {
            assets.sort_by(|a, b| compare_desc(fib_position(a), fib_position(b)));
        }
    }
}

fn fib_position(asset: &EnrichedAsset) -> Option<f64> {
    asset
        .fibonacci_analysis
        .as_ref()
        .map(|analysis| analysis.position_percentage)
}

fn compare_rank(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
