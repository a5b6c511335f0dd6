//! Cross-source identity.
//!
//! Listed securities share the exchange code across platforms, so an
//! exchange-qualified code is already canonical. Sectors have no shared code;
//! each platform names them slightly differently ("人工智能概念" vs
//! "人工智能"), so sector names are folded to a common form and then passed
//! through a configurable alias table.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::source::{Category, SourceId};

/// Prefix for sector canonical codes.
pub const SECTOR_PREFIX: &str = "SECTOR:";

static EXCHANGE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}\.(SH|SZ|BJ)$").unwrap());

/// Suffixes platforms append to sector names. Longest first.
const SECTOR_SUFFIXES: &[&str] = &[
    "(同花顺)",
    "(申万)",
    "(东财)",
    "(ths)",
    "概念股",
    "概念",
    "板块",
    "题材",
    "指数",
];

/// Resolves `canonical_code` for ranked entities.
#[derive(Debug, Clone, Default)]
pub struct CanonicalResolver {
    aliases: HashMap<String, String>,
}

impl CanonicalResolver {
    /// Resolver with no sector aliases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with a sector alias table. Keys and values are normalized the
    /// same way as incoming names, so either spelling may be configured.
    pub fn with_aliases<I, K, V>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let aliases = aliases
            .into_iter()
            .filter_map(|(from, to)| {
                let from = normalize_sector_name(from.as_ref());
                let to = normalize_sector_name(to.as_ref());
                (!from.is_empty() && !to.is_empty()).then_some((from, to))
            })
            .collect();
        Self { aliases }
    }

    /// Canonical code for an entity.
    ///
    /// Nameable sectors always land in the shared `SECTOR:` namespace, even
    /// when no other platform publishes the same name; only nameless sectors
    /// fall back to a source-scoped code.
    pub fn resolve(
        &self,
        source: SourceId,
        category: Category,
        entity_code: &str,
        entity_name: &str,
    ) -> String {
        if category.is_sector() {
            match self.sector_key(entity_name) {
                Some(name) => format!("{}{}", SECTOR_PREFIX, name),
                None => source_scoped(source, entity_code),
            }
        } else {
            security_code(entity_code).unwrap_or_else(|| source_scoped(source, entity_code))
        }
    }

    /// Normalized, alias-resolved sector name, or `None` when nothing remains.
    pub fn sector_key(&self, name: &str) -> Option<String> {
        let normalized = normalize_sector_name(name);
        if normalized.is_empty() {
            return None;
        }
        Some(self.aliases.get(&normalized).cloned().unwrap_or(normalized))
    }
}

/// Exchange-qualified form of a security code, if it has one.
pub fn security_code(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    EXCHANGE_CODE.is_match(&code).then_some(code)
}

/// `<source>:<code>` identity used when no cross-source identity exists.
pub fn source_scoped(source: SourceId, entity_code: &str) -> String {
    format!("{}:{}", source.as_str(), entity_code.trim())
}

/// Fold a sector name to its comparison form.
pub fn normalize_sector_name(name: &str) -> String {
    let folded: String = name.chars().map(fold_char).collect();
    let mut normalized = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    loop {
        let stripped = SECTOR_SUFFIXES.iter().find_map(|suffix| {
            normalized
                .strip_suffix(suffix)
                .map(str::trim_end)
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
        });
        match stripped {
            Some(rest) => normalized = rest,
            None => break,
        }
    }
    normalized
}

fn fold_char(c: char) -> char {
    let c = match c {
        '\u{3000}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        '【' | '〔' | '［' => '(',
        '】' | '〕' | '］' => ')',
        other => other,
    };
    c.to_ascii_lowercase()
}
