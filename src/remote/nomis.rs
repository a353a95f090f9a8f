//! NOMIS query helpers
//!
//! NOMIS accepts geography ranges (`E09000001...E09000033`) which keeps long
//! code lists inside URL length limits.

use std::collections::BTreeMap;

/// Compress GSS codes into NOMIS range syntax.
///
/// Codes are grouped by their leading letter; consecutive runs of three or
/// more collapse into `first...last`, runs of two are listed. Anything not
/// shaped like a GSS code (letter + 8 digits) is passed through unchanged.
pub fn compress_geography_codes(codes: &[String]) -> String {
    let mut by_prefix: BTreeMap<char, Vec<u32>> = BTreeMap::new();
    let mut passthrough: Vec<String> = Vec::new();

    for raw in codes {
        let code = raw.trim().to_uppercase();
        match split_gss(&code) {
            Some((prefix, number)) => by_prefix.entry(prefix).or_default().push(number),
            None if !code.is_empty() => passthrough.push(code),
            None => {}
        }
    }

    let mut parts = Vec::new();
    for (prefix, mut numbers) in by_prefix {
        numbers.sort_unstable();
        numbers.dedup();

        let mut i = 0;
        while i < numbers.len() {
            let start = numbers[i];
            let mut end = start;
            while i + 1 < numbers.len() && numbers[i + 1] == end + 1 {
                i += 1;
                end = numbers[i];
            }
            match end - start {
                0 => parts.push(gss(prefix, start)),
                1 => {
                    parts.push(gss(prefix, start));
                    parts.push(gss(prefix, end));
                }
                _ => parts.push(format!("{}...{}", gss(prefix, start), gss(prefix, end))),
            }
            i += 1;
        }
    }

    passthrough.sort();
    passthrough.dedup();
    parts.extend(passthrough);
    parts.join(",")
}

fn split_gss(code: &str) -> Option<(char, u32)> {
    let mut chars = code.chars();
    let prefix = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    let digits = chars.as_str();
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (prefix, n))
}

fn gss(prefix: char, number: u32) -> String {
    format!("{}{:08}", prefix, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_and_pairs() {
        assert_eq!(compress_geography_codes(&codes(&["E09000001"])), "E09000001");
        assert_eq!(
            compress_geography_codes(&codes(&["E09000002", "E09000001"])),
            "E09000001,E09000002"
        );
    }

    #[test]
    fn test_ranges_and_gaps() {
        let input = codes(&[
            "E09000005", "E09000001", "E09000002", "E09000003", "E09000010", "e09000011",
            "E09000012", "E09000003",
        ]);
        assert_eq!(
            compress_geography_codes(&input),
            "E09000001...E09000003,E09000005,E09000010...E09000012"
        );
    }

    #[test]
    fn test_mixed_prefixes_and_passthrough() {
        let input = codes(&["W06000015", "E06000001", "2092957697", "W06000016"]);
        assert_eq!(
            compress_geography_codes(&input),
            "E06000001,W06000015,W06000016,2092957697"
        );
    }
}
