//! Qualified names and aliases for entities exposed by upstream servers.

/// Separator placed between server name and original name.
pub const DEFAULT_SEPARATOR: &str = "--";

/// Qualify `name` with `server` to get a name unique across all servers.
pub fn qualify_name(server: &str, name: &str, separator: &str) -> String {
    format!("{server}{separator}{name}")
}

/// Every string that should resolve to the record for `name` on `server`.
///
/// The qualified name always comes first. The bare name follows only when
/// `is_claimed` reports that nothing else owns it yet.
pub fn enumerate_aliases(
    server: &str,
    name: &str,
    separator: &str,
    is_claimed: impl Fn(&str) -> bool,
) -> Vec<String> {
    let qualified = qualify_name(server, name, separator);
    let mut aliases = Vec::with_capacity(2);
    if !name.is_empty() && name != qualified && !is_claimed(name) {
        aliases.push(qualified);
        aliases.push(name.to_string());
    } else {
        aliases.push(qualified);
    }
    aliases
}

/// Split a qualified name back into `(server, name)` at the first separator.
pub fn split_qualified<'a>(qualified: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    if separator.is_empty() {
        return None;
    }
    qualified
        .split_once(separator)
        .filter(|(server, name)| !server.is_empty() && !name.is_empty())
}
