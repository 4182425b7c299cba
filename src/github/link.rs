//! RFC 8288 `Link` header parsing, as used by GitHub pagination.

use std::collections::HashMap;

/// Parses `<url>; rel="next", <url>; rel="last"` into a rel → URL map.
///
/// Segments without a `<...>` target or a `rel` parameter are skipped. When a
/// rel appears twice the first occurrence wins.
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
    let mut links = HashMap::new();

    for segment in header.split(',') {
        let mut parts = segment.split(';');
        let Some(target) = parts.next().map(str::trim) else {
            continue;
        };
        let Some(url) = target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .filter(|u| !u.is_empty())
        else {
            continue;
        };

        let rel = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim() == "rel").then(|| value.trim().trim_matches('"').to_string())
        });

        if let Some(rel) = rel.filter(|r| !r.is_empty()) {
            links.entry(rel).or_insert_with(|| url.to_string());
        }
    }

    links
}
