use serde::{Deserialize, Serialize};

/// Asset class of a tradable instrument.
///
/// The upstream feed carries two disjoint token spaces: index tokens and
/// equity tokens. The asset class decides which downstream endpoint family
/// a tick is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Index,
    Stock,
}

impl AssetClass {
    /// Wire representation used in outbound JSON tick messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Index => "INDEX",
            AssetClass::Stock => "STOCK",
        }
    }
}

/// Instrument metadata keyed by the upstream wire token.
///
/// Records are immutable once loaded; the directory replaces them wholesale
/// on refresh rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub token: u64,
    pub exchange_token: u64,
    pub symbol: String,
    pub asset_class: AssetClass,
}

/// Raw row as returned by the authoritative instrument source, before the
/// equity selection rule is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub token: u64,
    #[serde(default)]
    pub exchange_token: u64,
    pub symbol: String,
    /// Expiry date for derivative contracts; cash instruments carry none.
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default = "default_lot_size")]
    pub lot_size: u32,
    /// Descriptive company name; absent for synthetic listings.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_lot_size() -> u32 {
    1
}

/// Selection rule for tradable equities, reproducing the upstream dataset's
/// business rule: cash instruments only (no expiry), round lot of exactly 1,
/// and a non-empty descriptive name that is not a loan-against-shares
/// listing (name containing "LOAN", case-sensitive as sourced).
pub fn is_tradable_equity(row: &InstrumentRow) -> bool {
    row.expiry.is_none()
        && row.lot_size == 1
        && row
            .name
            .as_deref()
            .map_or(false, |name| !name.is_empty() && !name.contains("LOAN"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equity_row(symbol: &str) -> InstrumentRow {
        InstrumentRow {
            token: 738561,
            exchange_token: 2885,
            symbol: symbol.to_string(),
            expiry: None,
            lot_size: 1,
            name: Some(format!("{symbol} Industries Limited")),
        }
    }

    #[test]
    fn accepts_plain_cash_equity() {
        assert!(is_tradable_equity(&equity_row("RELIANCE")));
    }

    #[test]
    fn rejects_expiring_contract() {
        let mut row = equity_row("RELIANCE");
        row.expiry = Some("2026-09-24".to_string());
        assert!(!is_tradable_equity(&row));
    }

    #[test]
    fn rejects_non_round_lot() {
        let mut row = equity_row("RELIANCE");
        row.lot_size = 250;
        assert!(!is_tradable_equity(&row));
    }

    #[test]
    fn rejects_missing_or_empty_name() {
        let mut row = equity_row("RELIANCE");
        row.name = None;
        assert!(!is_tradable_equity(&row));
        row.name = Some(String::new());
        assert!(!is_tradable_equity(&row));
    }

    #[test]
    fn rejects_loan_listing() {
        let mut row = equity_row("ABCLOAN");
        row.name = Some("ABC LOAN FUND".to_string());
        assert!(!is_tradable_equity(&row));
    }

    #[test]
    fn loan_filter_is_case_sensitive() {
        let mut row = equity_row("ABC");
        row.name = Some("Abc Loan Services".to_string());
        assert!(is_tradable_equity(&row));
    }

    #[test]
    fn asset_class_wire_names() {
        assert_eq!(AssetClass::Index.as_str(), "INDEX");
        assert_eq!(AssetClass::Stock.as_str(), "STOCK");
    }
}
