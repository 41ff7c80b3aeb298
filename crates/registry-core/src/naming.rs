//! Collision-safe naming for aggregated views.
//!
//! An aggregated read spans every registry, so two registries may surface the
//! same entry name. Every entry of an aggregated read is rendered as
//! `<registry>.<entry>`; scoped reads keep the bare name. Prefixing is
//! unconditional, so a rendered name never depends on what else happens to be
//! in the aggregate.

use crate::config::NamingConfig;

/// True iff the read spans more than one registry (no explicit scope given).
pub fn should_prefix(scope: Option<&str>) -> bool {
    scope.is_none()
}

/// Render `registry.entry`. Entry names that already contain the delimiter
/// are prefixed once at the front and never re-parsed.
pub fn prefix(registry: &str, entry: &str) -> String {
    let mut out =
        String::with_capacity(registry.len() + NamingConfig::PREFIX_DELIMITER.len() + entry.len());
    out.push_str(registry);
    out.push_str(NamingConfig::PREFIX_DELIMITER);
    out.push_str(entry);
    out
}

/// The name an entry is surfaced under for a read with the given scope.
pub fn display_name(scope: Option<&str>, registry: &str, entry: &str) -> String {
    if should_prefix(scope) {
        prefix(registry, entry)
    } else {
        entry.to_string()
    }
}

/// Whether `requested` names the given entry under the given scope.
///
/// Aggregated lookups compare against the rendered name; the requested name is
/// never split on the delimiter.
pub fn matches(scope: Option<&str>, registry: &str, entry: &str, requested: &str) -> bool {
    if should_prefix(scope) {
        requested == prefix(registry, entry)
    } else {
        requested == entry
    }
}
