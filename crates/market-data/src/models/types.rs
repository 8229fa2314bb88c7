/// Canonical asset symbol (upper-cased base asset, e.g. "BTC")
pub type Symbol = String;

/// Opaque subscription handle returned to callers
pub type SubscriptionId = String;

/// Upper-cases and trims a caller-supplied symbol.
pub fn canonical_symbol(raw: &str) -> Symbol {
    raw.trim().to_ascii_uppercase()
}
