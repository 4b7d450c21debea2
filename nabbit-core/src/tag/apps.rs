//! Application ids stored on formatted tags

/// Application id of a tag formatted for no application
pub const APP_NONE: u8 = 255;

const APPLICATIONS: [(u8, &str); 14] = [
    (APP_NONE, "none"),
    (1, "nab8balld"),
    (2, "nabairqualityd"),
    (3, "nabblockly"),
    (4, "nabbookd"),
    (5, "nabclockd"),
    (6, "nabmastodond"),
    (7, "nabsurprised"),
    (8, "nabtaichid"),
    (9, "nabweatherd"),
    (10, "nabiftttd"),
    (11, "nabairqualityd"),
    (12, "nabradio"),
    (13, "nabwebhook"),
];

/// Name of a known application id
pub fn app_name(id: u8) -> Option<&'static str> {
    APPLICATIONS.iter().find(|(i, _)| *i == id).map(|(_, name)| *name)
}

/// Application id from a name or a decimal id
///
/// Unknown names map to [`APP_NONE`].
pub fn app_id(name: &str) -> u8 {
    APPLICATIONS
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| *id)
        .or_else(|| name.parse().ok())
        .unwrap_or(APP_NONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_lookup() {
        assert_eq!(app_name(8), Some("nabtaichid"));
        assert_eq!(app_name(42), None);
        assert_eq!(app_id("nabclockd"), 5);
        assert_eq!(app_id("nabairqualityd"), 2);
        assert_eq!(app_id("42"), 42);
        assert_eq!(app_id("whatever"), APP_NONE);
        assert_eq!(app_id("none"), APP_NONE);
    }
}
