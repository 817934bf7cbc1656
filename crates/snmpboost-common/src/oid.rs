//! Helpers for dotted OID strings as they are stored in the cache.
//!
//! OIDs are kept as strings with a leading dot (`.1.3.6.1.2.1.1.5.0`). An OID
//! may still carry an unresolved `map(<table>,<name>)` placeholder until the
//! instance mapping for its service completes.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static MAP_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"map\(([^,()]*),([^()]*)\)").expect("map expression pattern is valid"));

static LABEL_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,:/ ]").expect("label separator pattern is valid"));

/// Ensures a single leading dot and no trailing dot.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::normalize;
///
/// assert_eq!(normalize("1.3.6.1"), ".1.3.6.1");
/// assert_eq!(normalize(".1.3.6.1."), ".1.3.6.1");
/// ```
pub fn normalize(oid: &str) -> String {
    let trimmed = oid.trim().trim_matches('.');
    format!(".{trimmed}")
}

/// Numeric components of a fully resolved OID, or `None` when any component
/// is not a number (for instance an unresolved `map(...)`).
pub fn components(oid: &str) -> Option<Vec<u64>> {
    oid.trim()
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>().ok())
        .collect()
}

pub fn is_numeric(oid: &str) -> bool {
    components(oid).is_some_and(|c| !c.is_empty())
}

/// Lexicographic comparison by numeric component, the order agents walk in.
/// Non-numeric OIDs sort after numeric ones by plain string order.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (components(a), components(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Sorts and deduplicates a list of OIDs in walk order.
pub fn sort_dedup(oids: &mut Vec<String>) {
    oids.sort_by(|a, b| compare(a, b));
    oids.dedup();
}

/// The OID to send in a GETNEXT/GETBULK so that the agent's successor is the
/// wanted OID itself: last component minus one, or the parent when the last
/// component is zero.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::predecessor;
///
/// assert_eq!(predecessor(".1.3.6.1.2.1.2.2.1.10.7"), ".1.3.6.1.2.1.2.2.1.10.6");
/// assert_eq!(predecessor(".1.3.6.1.2.1.1.5.0"), ".1.3.6.1.2.1.1.5");
/// ```
pub fn predecessor(oid: &str) -> String {
    let Some(mut parts) = components(oid) else {
        return parent(oid);
    };
    match parts.pop() {
        Some(0) | None if parts.is_empty() => normalize(oid),
        Some(0) | None => join(&parts),
        Some(n) => {
            parts.push(n - 1);
            join(&parts)
        }
    }
}

fn join(parts: &[u64]) -> String {
    parts.iter().fold(String::new(), |mut acc, p| {
        acc.push('.');
        acc.push_str(&p.to_string());
        acc
    })
}

/// Parent OID (drops the last component).
pub fn parent(oid: &str) -> String {
    let trimmed = oid.trim().trim_end_matches('.');
    match trimmed.rsplit_once('.') {
        Some((parent, _)) => normalize(parent),
        None => normalize(trimmed),
    }
}

/// The part of `oid` below `base`, when `oid` is a strict descendant.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::suffix_under;
///
/// assert_eq!(suffix_under(".1.3.6.1.2.1.2.2.1.2.7", ".1.3.6.1.2.1.2.2.1.2"), Some("7"));
/// assert_eq!(suffix_under(".1.3.6.1.2.1.2.2.1.20", ".1.3.6.1.2.1.2.2.1.2"), None);
/// assert_eq!(suffix_under(".1.3.6.1.2.1.2.2.1.2", ".1.3.6.1.2.1.2.2.1.2"), None);
/// ```
pub fn suffix_under<'a>(oid: &'a str, base: &str) -> Option<&'a str> {
    let base = base.trim_end_matches('.');
    oid.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
}

pub fn is_strict_descendant(oid: &str, base: &str) -> bool {
    suffix_under(oid, base).is_some()
}

/// A parsed `map(<table>,<name>)` instance expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapExpr {
    pub table: String,
    pub name: String,
}

/// Extracts the first `map(<table>,<name>)` expression from `s`.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::parse_map_expr;
///
/// let expr = parse_map_expr("map(ifTable,eth0)").unwrap();
/// assert_eq!(expr.table, "ifTable");
/// assert_eq!(expr.name, "eth0");
/// assert!(parse_map_expr("7").is_none());
/// ```
pub fn parse_map_expr(s: &str) -> Option<MapExpr> {
    MAP_EXPR.captures(s).map(|caps| MapExpr {
        table: caps[1].trim().to_string(),
        name: caps[2].trim().to_string(),
    })
}

pub fn contains_map_expr(s: &str) -> bool {
    MAP_EXPR.is_match(s)
}

/// Replaces every `map(...)` expression in `template` with `instance`.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::substitute_map;
///
/// assert_eq!(
///     substitute_map(".1.3.6.1.2.1.2.2.1.10.map(ifTable,eth0)", "7"),
///     ".1.3.6.1.2.1.2.2.1.10.7"
/// );
/// ```
pub fn substitute_map(template: &str, instance: &str) -> String {
    MAP_EXPR.replace_all(template, instance).into_owned()
}

/// Mapping-table label with separator characters replaced by `_`.
///
/// # Examples
///
/// ```
/// use snmpboost_common::oid::clean_label;
///
/// assert_eq!(clean_label("Gi0/1: uplink"), "Gi0_1__uplink");
/// ```
pub fn clean_label(label: &str) -> String {
    LABEL_SEPARATORS.replace_all(label, "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessor_of_single_component() {
        assert_eq!(predecessor(".5"), ".4");
        assert_eq!(predecessor(".0"), ".0");
    }

    #[test]
    fn compare_is_numeric_not_textual() {
        assert_eq!(compare(".1.3.6.1.2", ".1.3.6.1.10"), Ordering::Less);
        let mut oids = vec![
            ".1.3.6.1.10".to_string(),
            ".1.3.6.1.2".to_string(),
            ".1.3.6.1.2".to_string(),
        ];
        sort_dedup(&mut oids);
        assert_eq!(oids, vec![".1.3.6.1.2", ".1.3.6.1.10"]);
    }

    #[test]
    fn map_oids_are_not_numeric() {
        assert!(!is_numeric(".1.3.6.map(ifTable,eth0)"));
        assert!(is_numeric("1.3.6"));
        assert!(contains_map_expr(".1.3.6.map(ifTable,eth0)"));
    }

    #[test]
    fn parent_drops_last_component() {
        assert_eq!(parent(".1.3.6.1.2.1.2.2.1.2.7"), ".1.3.6.1.2.1.2.2.1.2");
    }
}
