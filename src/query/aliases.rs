//! Static alias table
//!
//! Canonical names of countries, politicians, institutions and assets that
//! appear in market questions, with the variants people actually type. All
//! entries are casefolded.

/// (canonical, variants)
pub const ALIASES: &[(&str, &[&str])] = &[
    // countries and blocs
    ("united states", &["us", "usa", "u.s.", "america"]),
    ("united kingdom", &["uk", "britain", "great britain"]),
    ("european union", &["eu"]),
    ("russia", &["russian federation", "kremlin"]),
    ("china", &["prc", "beijing"]),
    ("ukraine", &["kyiv", "kiev"]),
    ("israel", &["idf"]),
    ("north korea", &["dprk", "pyongyang"]),
    // politicians
    ("donald trump", &["trump", "djt", "the donald"]),
    ("joe biden", &["biden", "potus"]),
    ("kamala harris", &["harris", "kamala"]),
    ("vladimir putin", &["putin"]),
    ("volodymyr zelensky", &["zelensky", "zelenskyy"]),
    ("benjamin netanyahu", &["netanyahu", "bibi"]),
    ("xi jinping", &["xi"]),
    ("elon musk", &["musk", "elon"]),
    // institutions
    ("federal reserve", &["fed", "fomc", "the fed"]),
    ("supreme court", &["scotus"]),
    ("securities and exchange commission", &["sec"]),
    // assets
    ("bitcoin", &["btc", "xbt"]),
    ("ethereum", &["eth", "ether"]),
    ("solana", &["sol"]),
    ("dogecoin", &["doge"]),
    ("s&p 500", &["spx", "sp500", "s&p"]),
];

/// Alias expansions of `term` in both directions
///
/// A canonical name yields its variants; a variant yields its canonical name
/// and its sibling variants. The term itself is never returned.
pub fn expand(term: &str) -> Vec<&'static str> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for (canonical, variants) in ALIASES {
        let hit = *canonical == needle || variants.iter().any(|v| *v == needle);
        if !hit {
            continue;
        }
        for candidate in std::iter::once(canonical).chain(variants.iter()) {
            if *candidate != needle && !out.contains(candidate) {
                out.push(*candidate);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_expands_to_variants() {
        let out = expand("Bitcoin");
        assert_eq!(out, vec!["btc", "xbt"]);
    }

    #[test]
    fn test_variant_expands_to_canonical_and_siblings() {
        let out = expand("BTC");
        assert_eq!(out, vec!["bitcoin", "xbt"]);
    }

    #[test]
    fn test_unknown_term() {
        assert!(expand("Nowhere").is_empty());
        assert!(expand("  ").is_empty());
    }

    #[test]
    fn test_table_is_casefolded() {
        for (canonical, variants) in ALIASES {
            assert_eq!(*canonical, canonical.to_lowercase());
            for v in *variants {
                assert_eq!(*v, v.to_lowercase());
            }
        }
    }
}
