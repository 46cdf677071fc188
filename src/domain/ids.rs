//! # Content-addressed identifiers
//!
//! Every row in the geography and star-schema tables is keyed by a digest of
//! its normalized natural key. Deriving the same key twice always yields the
//! same id, which is what makes imports and transforms safe to re-run.

/// Trim surrounding whitespace and lower-case a key part.
#[must_use]
pub fn normalize_key(part: &str) -> String {
    part.trim().to_lowercase()
}

/// Postal codes are stored without interior spaces ("10 115" and "10115" are one area).
#[must_use]
pub fn normalize_postal_code(code: &str) -> String {
    code.split_whitespace().collect()
}

/// Hex blake3 digest over the concatenation of the normalized parts.
pub fn content_id<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(normalize_key(part.as_ref()).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[must_use]
pub fn country_id(country: &str) -> String {
    content_id([country])
}

#[must_use]
pub fn province_id(country: &str, province: &str) -> String {
    content_id([country, province])
}

#[must_use]
pub fn city_id(country: &str, province: &str, city: &str) -> String {
    content_id([country, province, city])
}

#[must_use]
pub fn postal_area_id(country: &str, postal_code: &str) -> String {
    content_id([country, &normalize_postal_code(postal_code)])
}

#[must_use]
pub fn date_id(date: &str) -> String {
    content_id([date])
}

#[must_use]
pub fn hour_id(hour: u32) -> String {
    content_id([hour.to_string()])
}

#[must_use]
pub fn component_id(canonical_name: &str) -> String {
    content_id([canonical_name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Testland", "North")]
    #[case("  testland ", "NORTH")]
    #[case("TESTLAND\t", " north\n")]
    fn province_id_ignores_case_and_padding(#[case] country: &str, #[case] province: &str) {
        assert_eq!(province_id(country, province), province_id("testland", "north"));
    }

    #[test]
    fn postal_code_spaces_are_removed() {
        assert_eq!(postal_area_id("Testland", "10 115"), postal_area_id("testland", "10115"));
        assert_eq!(normalize_postal_code(" 1 0 00 "), "1000");
    }

    #[test]
    fn different_keys_give_different_ids() {
        assert_ne!(country_id("Testland"), country_id("Otherland"));
        assert_ne!(hour_id(1), hour_id(2));
        assert_eq!(country_id("x").len(), 64);
    }
}
