//! Consul address normalization
//!
//! Every external use of the store address goes through one of these two
//! functions: HTTP calls need an explicit scheme, consul-template wants a
//! bare `host:port`.

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Length of the scheme prefix of `address`, compared case-insensitively
fn scheme_len(address: &str) -> Option<usize> {
    SCHEMES.iter().find_map(|scheme| {
        address
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| scheme.len())
    })
}

/// Ensure the address carries a scheme, assuming `http://` when none is given
pub fn normalize(address: &str) -> String {
    let address = address.trim();
    match scheme_len(address) {
        Some(_) => address.to_string(),
        None => format!("http://{}", address),
    }
}

/// Remove a leading `http://` or `https://` (any case) from the address
pub fn strip_scheme(address: &str) -> &str {
    let address = address.trim();
    match scheme_len(address) {
        Some(len) => &address[len..],
        None => address,
    }
}
