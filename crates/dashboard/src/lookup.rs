//! Static reference data handed to the rendering layer.

/// State abbreviation -> FIPS code, used to place states on a map.
pub const STATE_FIPS: &[(&str, u32)] = &[
    ("AL", 1), ("AK", 2), ("AZ", 4), ("AR", 5), ("CA", 6), ("CO", 8), ("CT", 9),
    ("DE", 10), ("DC", 11), ("FL", 12), ("GA", 13), ("HI", 15), ("ID", 16),
    ("IL", 17), ("IN", 18), ("IA", 19), ("KS", 20), ("KY", 21), ("LA", 22),
    ("ME", 23), ("MD", 24), ("MA", 25), ("MI", 26), ("MN", 27), ("MS", 28),
    ("MO", 29), ("MT", 30), ("NE", 31), ("NV", 32), ("NH", 33), ("NJ", 34),
    ("NM", 35), ("NY", 36), ("NC", 37), ("ND", 38), ("OH", 39), ("OK", 40),
    ("OR", 41), ("PA", 42), ("RI", 44), ("SC", 45), ("SD", 46), ("TN", 47),
    ("TX", 48), ("UT", 49), ("VT", 50), ("VA", 51), ("WA", 53), ("WV", 54),
    ("WI", 55), ("WY", 56), ("PR", 72),
];

/// State abbreviation -> full name.
pub const STATE_NAMES: &[(&str, &str)] = &[
    ("AL", "Alabama"), ("AK", "Alaska"), ("AZ", "Arizona"), ("AR", "Arkansas"),
    ("CA", "California"), ("CO", "Colorado"), ("CT", "Connecticut"), ("DE", "Delaware"),
    ("DC", "District of Columbia"), ("FL", "Florida"), ("GA", "Georgia"), ("HI", "Hawaii"),
    ("ID", "Idaho"), ("IL", "Illinois"), ("IN", "Indiana"), ("IA", "Iowa"),
    ("KS", "Kansas"), ("KY", "Kentucky"), ("LA", "Louisiana"), ("ME", "Maine"),
    ("MD", "Maryland"), ("MA", "Massachusetts"), ("MI", "Michigan"), ("MN", "Minnesota"),
    ("MS", "Mississippi"), ("MO", "Missouri"), ("MT", "Montana"), ("NE", "Nebraska"),
    ("NV", "Nevada"), ("NH", "New Hampshire"), ("NJ", "New Jersey"), ("NM", "New Mexico"),
    ("NY", "New York"), ("NC", "North Carolina"), ("ND", "North Dakota"), ("OH", "Ohio"),
    ("OK", "Oklahoma"), ("OR", "Oregon"), ("PA", "Pennsylvania"), ("RI", "Rhode Island"),
    ("SC", "South Carolina"), ("SD", "South Dakota"), ("TN", "Tennessee"), ("TX", "Texas"),
    ("UT", "Utah"), ("VT", "Vermont"), ("VA", "Virginia"), ("WA", "Washington"),
    ("WV", "West Virginia"), ("WI", "Wisconsin"), ("WY", "Wyoming"), ("PR", "Puerto Rico"),
];

/// Directorates shown in the directorate panels.
pub const MAIN_DIRECTORATES: &[&str] = &["MPS", "CSE", "ENG", "GEO", "EDU", "BIO", "TIP", "SBE", "O/D"];

pub fn fips_code(abbreviation: &str) -> Option<u32> {
    STATE_FIPS
        .iter()
        .find(|(abbr, _)| *abbr == abbreviation)
        .map(|(_, fips)| *fips)
}

pub fn state_name(abbreviation: &str) -> Option<&'static str> {
    STATE_NAMES
        .iter()
        .find(|(abbr, _)| *abbr == abbreviation)
        .map(|(_, name)| *name)
}

pub fn is_main_directorate(code: &str) -> bool {
    MAIN_DIRECTORATES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_state_has_a_fips_code() {
        assert_eq!(STATE_FIPS.len(), STATE_NAMES.len());
        for (abbr, _) in STATE_NAMES {
            assert!(fips_code(abbr).is_some(), "{abbr} has no FIPS code");
        }
    }

    #[test]
    fn lookups() {
        assert_eq!(fips_code("DC"), Some(11));
        assert_eq!(fips_code("PR"), Some(72));
        assert_eq!(fips_code("GU"), None);
        assert_eq!(state_name("WV"), Some("West Virginia"));
        assert!(is_main_directorate("O/D"));
        assert!(!is_main_directorate("OIA"));
    }
}
