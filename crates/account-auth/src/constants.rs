//! Protocol constants shared by the strategies and the registry

/// Seconds subtracted from a token's lifetime to absorb clock skew and
/// request latency. A token inside this margin is refreshed before use.
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 5;

/// Header string returned once a bearer session has been rejected by the
/// token server. Not a valid header line: callers treat it as "logged out".
pub const EXPIRED_SENTINEL: &str = "expired";

/// URL sentinel that resolves to whichever strategy was registered first.
/// Used for account-wide lookups where a single account is expected.
pub const ANY_URL: &str = "any";

/// Name of the header produced by every strategy.
pub const AUTHORIZATION_HEADER: &str = "Authorization";
