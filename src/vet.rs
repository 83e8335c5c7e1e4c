//! "Find nearest vet" links.

const MAP_SEARCH_BASE: &str = "https://www.google.com/maps/search/";

/// Query used when the farmer has not set a location.
pub const DEFAULT_VET_QUERY: &str = "nearest veterinary hospital";

/// Placeholder stored in an unset profile field.
pub const UNSET_PROFILE_VALUE: &str = "Not Set";

/// Map search for the given free-text location.
pub fn vet_map_link(location: &str) -> String {
    let location = location.trim();
    let query = if location.is_empty() || location == UNSET_PROFILE_VALUE {
        DEFAULT_VET_QUERY
    } else {
        location
    };
    format!("{}{}", MAP_SEARCH_BASE, urlencoding::encode(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_encodes_location() {
        assert_eq!(
            vet_map_link("Pune, India"),
            "https://www.google.com/maps/search/Pune%2C%20India"
        );
        assert_eq!(vet_map_link(" Pune "), "https://www.google.com/maps/search/Pune");
    }

    #[test]
    fn unset_location_falls_back() {
        let expected = "https://www.google.com/maps/search/nearest%20veterinary%20hospital";
        assert_eq!(vet_map_link(""), expected);
        assert_eq!(vet_map_link("  Not Set "), expected);
    }
}
