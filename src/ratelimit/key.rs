//! Throttling key derivation from request metadata.
//!
//! The limiter itself treats keys as opaque strings. These helpers give
//! route handlers one consistent way to turn request headers into a key.

use std::collections::HashMap;

/// Key shared by every request that carries no address information.
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Read-only, case-insensitive access to request headers.
pub trait HeaderLookup {
    /// Value of the header named `name` (lowercase), if present.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str).or_else(|| {
            self.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}

impl HeaderLookup for [(&str, &str)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

impl<const N: usize> HeaderLookup for [(&str, &str); N] {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

/// Best-effort client address for throttling.
///
/// Takes the first hop of `X-Forwarded-For`, then `X-Real-IP`, and
/// otherwise falls back to [`UNKNOWN_CLIENT`].
pub fn client_address<H: HeaderLookup + ?Sized>(headers: &H) -> String {
    let forwarded = headers
        .header(FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    headers
        .header(REAL_IP)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Key scoped to one action, e.g. `register:203.0.113.5`.
pub fn scoped_key(action: &str, client: &str) -> String {
    format!("{}:{}", action, client)
}
