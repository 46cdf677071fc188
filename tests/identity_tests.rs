//! Content-addressed ids are stable under case and whitespace changes
use energy_price_crawler::domain::ids;
use energy_price_crawler::domain::{PostalArea, Province};
use proptest::prelude::*;

fn vary_case(value: &str, mask: u64) -> String {
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if mask >> (i % 64) & 1 == 1 { c.to_ascii_uppercase() } else { c })
        .collect()
}

proptest! {
    #[test]
    fn province_id_ignores_case_and_padding(
        country in "[a-z]{1,12}( [a-z]{1,8})?",
        province in "[a-z]{1,16}",
        mask in any::<u64>(),
        left in 0usize..4,
        right in 0usize..4,
    ) {
        let padded = format!("{}{}{}", " ".repeat(left), vary_case(&province, mask), "\t".repeat(right));
        prop_assert_eq!(
            ids::province_id(&country, &province),
            ids::province_id(&vary_case(&country, !mask), &padded)
        );
        prop_assert_eq!(Province::new(&country, &province).id, Province::new(&country, &padded).id);
    }

    #[test]
    fn postal_code_spacing_does_not_change_the_area(code in "[0-9]{4,6}", split in 1usize..4) {
        let split = split.min(code.len() - 1);
        let spaced = format!("{} {}", &code[..split], &code[split..]);
        prop_assert_eq!(ids::postal_area_id("Testland", &code), ids::postal_area_id("Testland", &spaced));
        let area = PostalArea::new("Testland", "North", "Capital", &spaced, None);
        prop_assert_eq!(area.code, code);
    }

    #[test]
    fn different_provinces_get_different_ids(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
        prop_assume!(a != b);
        prop_assert_ne!(ids::province_id("Testland", &a), ids::province_id("Testland", &b));
    }
}

#[test]
fn ids_are_lowercase_hex_digests() {
    let id = ids::country_id("Testland");
    assert_eq!(id.len(), 64);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}
