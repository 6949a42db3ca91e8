/// Work unit registry for the harvest.
///
/// Defines the canonical, ordered universe of units the pipeline walks
/// through: one per USGS state code. The order here is the order the chain
/// consumes them in, and a link's `offset` indexes into it, so entries must
/// only ever be appended.

// ---------------------------------------------------------------------------
// Unit metadata
// ---------------------------------------------------------------------------

/// Metadata for a single harvest unit.
pub struct Unit {
    /// Two-letter USPS/USGS state code, passed as `stateCd`.
    pub code: &'static str,
    /// Two-digit FIPS code.
    pub fips: &'static str,
    pub name: &'static str,
}

/// All units harvested, in chain order.
pub static UNIT_REGISTRY: &[Unit] = &[
    Unit { code: "AL", fips: "01", name: "Alabama" },
    Unit { code: "AK", fips: "02", name: "Alaska" },
    Unit { code: "AZ", fips: "04", name: "Arizona" },
    Unit { code: "AR", fips: "05", name: "Arkansas" },
    Unit { code: "CA", fips: "06", name: "California" },
    Unit { code: "CO", fips: "08", name: "Colorado" },
    Unit { code: "CT", fips: "09", name: "Connecticut" },
    Unit { code: "DE", fips: "10", name: "Delaware" },
    Unit { code: "DC", fips: "11", name: "District of Columbia" },
    Unit { code: "FL", fips: "12", name: "Florida" },
    Unit { code: "GA", fips: "13", name: "Georgia" },
    Unit { code: "HI", fips: "15", name: "Hawaii" },
    Unit { code: "ID", fips: "16", name: "Idaho" },
    Unit { code: "IL", fips: "17", name: "Illinois" },
    Unit { code: "IN", fips: "18", name: "Indiana" },
    Unit { code: "IA", fips: "19", name: "Iowa" },
    Unit { code: "KS", fips: "20", name: "Kansas" },
    Unit { code: "KY", fips: "21", name: "Kentucky" },
    Unit { code: "LA", fips: "22", name: "Louisiana" },
    Unit { code: "ME", fips: "23", name: "Maine" },
    Unit { code: "MD", fips: "24", name: "Maryland" },
    Unit { code: "MA", fips: "25", name: "Massachusetts" },
    Unit { code: "MI", fips: "26", name: "Michigan" },
    Unit { code: "MN", fips: "27", name: "Minnesota" },
    Unit { code: "MS", fips: "28", name: "Mississippi" },
    Unit { code: "MO", fips: "29", name: "Missouri" },
    Unit { code: "MT", fips: "30", name: "Montana" },
    Unit { code: "NE", fips: "31", name: "Nebraska" },
    Unit { code: "NV", fips: "32", name: "Nevada" },
    Unit { code: "NH", fips: "33", name: "New Hampshire" },
    Unit { code: "NJ", fips: "34", name: "New Jersey" },
    Unit { code: "NM", fips: "35", name: "New Mexico" },
    Unit { code: "NY", fips: "36", name: "New York" },
    Unit { code: "NC", fips: "37", name: "North Carolina" },
    Unit { code: "ND", fips: "38", name: "North Dakota" },
    Unit { code: "OH", fips: "39", name: "Ohio" },
    Unit { code: "OK", fips: "40", name: "Oklahoma" },
    Unit { code: "OR", fips: "41", name: "Oregon" },
    Unit { code: "PA", fips: "42", name: "Pennsylvania" },
    Unit { code: "RI", fips: "44", name: "Rhode Island" },
    Unit { code: "SC", fips: "45", name: "South Carolina" },
    Unit { code: "SD", fips: "46", name: "South Dakota" },
    Unit { code: "TN", fips: "47", name: "Tennessee" },
    Unit { code: "TX", fips: "48", name: "Texas" },
    Unit { code: "UT", fips: "49", name: "Utah" },
    Unit { code: "VT", fips: "50", name: "Vermont" },
    Unit { code: "VA", fips: "51", name: "Virginia" },
    Unit { code: "WA", fips: "53", name: "Washington" },
    Unit { code: "WV", fips: "54", name: "West Virginia" },
    Unit { code: "WI", fips: "55", name: "Wisconsin" },
    Unit { code: "WY", fips: "56", name: "Wyoming" },
    Unit { code: "PR", fips: "72", name: "Puerto Rico" },
];

/// Returns the unit codes in chain order, as owned strings ready to hand to
/// `Harvester::new`.
pub fn all_unit_codes() -> Vec<String> {
    UNIT_REGISTRY.iter().map(|u| u.code.to_string()).collect()
}

/// Looks up a unit by code. Returns `None` if not found.
pub fn find_unit(code: &str) -> Option<&'static Unit> {
    UNIT_REGISTRY.iter().find(|u| u.code == code)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
