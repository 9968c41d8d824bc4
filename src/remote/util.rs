//! Path helpers for user-supplied CLI values.

use camino::Utf8Path;

/// Expands `~` and a leading `~/` to the user's home directory, as a shell
/// would for image paths, key files and `--copy` sources.
///
/// Paths are returned unchanged when `HOME` is unset or empty, and `~user`
/// forms are never expanded.
///
/// # Examples
///
/// ```
/// # use vmtest::remote::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_ed25519"), format!("{home}/.ssh/id_ed25519"));
/// assert_eq!(expand_tilde("~"), home);
/// assert_eq!(expand_tilde("disk.qcow2"), "disk.qcow2");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    let home_dir = std::env::var("HOME").ok().filter(|dir| !dir.is_empty());
    match (path, home_dir) {
        ("~", Some(home)) => home,
        (_, Some(home)) => path.strip_prefix("~/").map_or_else(
            || path.to_owned(),
            |rest| Utf8Path::new(&home).join(rest).into_string(),
        ),
        (_, None) => path.to_owned(),
    }
}
