//! Configuration access port trait.

/// Read access to `[section] key` settings.
///
/// Integer lookups fall back to the caller's default when the key is absent
/// or is not a whole number.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
}
