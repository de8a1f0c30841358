//! Parsing and building of replica locators:
//! `<node_base>/<hh>/<hh>/<digest>`.

/// Build the locator for `digest` on `node`.
pub fn build(node: &str, digest: &str) -> String {
    let node = node.trim_end_matches('/');
    format!("{node}/{}/{}/{digest}", &digest[0..2], &digest[2..4])
}

/// Recover the node's base URL (scheme + authority) from a locator, by
/// taking the first three `/`-separated segments: `scheme:`, the empty
/// segment between the two slashes, and the authority.
pub fn base_url(locator: &str) -> Option<String> {
    let parts: Vec<&str> = locator.split('/').collect();
    if parts.len() < 6 || !parts[0].ends_with(':') || !parts[1].is_empty() {
        return None;
    }
    Some(format!("{}//{}", parts[0], parts[2]))
}

/// Recover the digest (basename) from a locator.
pub fn digest(locator: &str) -> Option<&str> {
    locator.rsplit('/').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";

    #[test]
    fn build_matches_expected_layout() {
        let loc = build("http://v1", DIGEST);
        assert_eq!(loc, format!("http://v1/48/6e/{DIGEST}"));
    }

    #[test]
    fn base_url_recovers_scheme_and_authority() {
        let loc = build("http://v1:8081", DIGEST);
        assert_eq!(base_url(&loc).as_deref(), Some("http://v1:8081"));
    }

    #[test]
    fn digest_recovers_basename() {
        let loc = build("http://v1", DIGEST);
        assert_eq!(digest(&loc), Some(DIGEST));
    }
}
