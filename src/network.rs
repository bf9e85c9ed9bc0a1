//! Default endpoints and timing constants.

use std::time::Duration;

/// Default REST API host (throttle identity).
pub const DEFAULT_REST_HOST: &str = "www.bitstamp.net";

/// Default REST API base URL.
pub const DEFAULT_REST_URL: &str = "https://www.bitstamp.net/api/";

/// Per-call transport timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending envelopes a host queue accepts before signalling backpressure.
pub const DEFAULT_HOST_CAPACITY: usize = 256;

/// Minimum spacing the REST backend tolerates between requests.
pub const REST_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Ticker poll interval.
pub const DEFAULT_TICKER_INTERVAL: Duration = Duration::from_millis(16_384);

/// Depth poll interval.
pub const DEFAULT_DEPTH_INTERVAL: Duration = Duration::from_millis(16_384);

/// Trades poll interval.
pub const DEFAULT_TRADES_INTERVAL: Duration = Duration::from_millis(65_536);
