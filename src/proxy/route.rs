use once_cell::sync::Lazy;
use regex::Regex;

const ONION_TLD: &str = "onion";
const ONION_SUFFIX: &str = ".onion";

static ONION_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9.-]+\.onion$").expect("valid onion host pattern"));

/// Where a request for a given host is fetched from. The set is closed: a host is either an
/// onion service reached through the bridge, or anything else reached directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Onion,
    Clearnet,
}

impl Route {
    /// Anything under the onion TLD goes to the bridge, malformed names included; those are
    /// refused later instead of leaking to DNS.
    pub fn classify(host: &str) -> Self {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host == ONION_TLD || host.ends_with(ONION_SUFFIX) {
            Route::Onion
        } else {
            Route::Clearnet
        }
    }

    pub fn is_onion(self) -> bool {
        matches!(self, Route::Onion)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Route::Onion => "onion",
            Route::Clearnet => "clearnet",
        }
    }
}

/// Strict check applied to every fetched onion host; only well-formed lowercase names pass.
pub fn is_valid_onion_host(host: &str) -> bool {
    ONION_HOST.is_match(host)
}
