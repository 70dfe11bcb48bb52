//! Hierarchical `@` addresses.
//!
//! `bob@alice` is consumed one segment per relay hop: the first segment
//! picks the local route, the remainder travels on untouched.

/// Segment separator in targets and author chains.
pub const SEPARATOR: char = '@';

/// Split an address into its lower-cased local segment and the verbatim
/// remainder (empty when there is only one segment).
///
/// Returns `("a", "b@c")` for `"A@b@c"`.
pub fn resolve(address: &str) -> (String, String) {
    match address.split_once(SEPARATOR) {
        Some((local, rest)) => (local.to_lowercase(), rest.to_owned()),
        None => (address.to_lowercase(), String::new()),
    }
}

/// Prepend the current hop's identity to an author chain.
///
/// An empty chain (a message fresh from a client) becomes just the hop.
pub fn prepend_hop(hop: &str, author: &str) -> String {
    if author.is_empty() {
        hop.to_owned()
    } else {
        format!("{hop}{SEPARATOR}{author}")
    }
}

/// Canonical identity for a username.
pub fn canonical(username: &str) -> String {
    username.to_lowercase()
}

/// Usernames and federation target names: 3–32 ASCII alphanumerics.
pub fn is_valid_username(name: &str) -> bool {
    (3..=32).contains(&name.len()) && name.bytes().all(|b| b.is_ascii_alphanumeric())
}
