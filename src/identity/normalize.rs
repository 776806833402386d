// =============================================================================
// Ticker/name normalization (step 2)
// =============================================================================

const MARKET_SUFFIXES: &[&str] = &[" US", " UN", ".OQ"];
const COMPANY_SUFFIXES: &[&str] = &[
    "CORP", "INC", "AG", "PLC", "NV", "SA", "CLASS A", "CLASS B", "CLASS C",
];

/// Produce the list of normalized variants to try against the cache/Hive for
/// a single uppercased raw key. Always includes the raw key itself so an
/// already-clean ticker or name still matches.
pub fn variants(upper: &str) -> Vec<String> {
    let mut out = vec![upper.to_string()];

    let mut ticker = upper.to_string();
    for suffix in MARKET_SUFFIXES {
        if let Some(stripped) = ticker.strip_suffix(suffix) {
            ticker = stripped.to_string();
        }
    }
    ticker = ticker.replace("/B", ".B");
    if ticker != upper {
        out.push(ticker);
    }

    let mut name = upper.to_string();
    for suffix in COMPANY_SUFFIXES {
        let with_space = format!(" {suffix}");
        if let Some(stripped) = name.strip_suffix(&with_space) {
            name = stripped.trim().to_string();
        }
    }
    if name != upper && !out.contains(&name) {
        out.push(name);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_market_suffix() {
        let v = variants("AAPL US");
        assert!(v.contains(&"AAPL".to_string()));
    }

    #[test]
    fn rewrites_class_share_slash() {
        let v = variants("BRK/B");
        assert!(v.contains(&"BRK.B".to_string()));
    }

    #[test]
    fn strips_company_suffix_token() {
        let v = variants("ACME CORP");
        assert!(v.contains(&"ACME".to_string()));
    }

    #[test]
    fn clean_key_has_single_variant() {
        let v = variants("NVDA");
        assert_eq!(v, vec!["NVDA".to_string()]);
    }
}
