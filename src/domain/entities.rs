//! Geography and star-schema entities.

use serde::{Deserialize, Serialize};

use super::ids;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: String,
    pub name: String,
    pub vat: f64,
    pub currency: String,
}

impl Country {
    #[must_use]
    pub fn new(name: &str, vat: f64, currency: &str) -> Self {
        Self {
            id: ids::country_id(name),
            name: name.trim().to_string(),
            vat,
            currency: currency.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    pub id: String,
    pub name: String,
    pub country_id: String,
}

impl Province {
    #[must_use]
    pub fn new(country: &str, name: &str) -> Self {
        Self {
            id: ids::province_id(country, name),
            name: name.trim().to_string(),
            country_id: ids::country_id(country),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    pub province_id: String,
}

impl City {
    #[must_use]
    pub fn new(country: &str, province: &str, name: &str) -> Self {
        Self {
            id: ids::city_id(country, province, name),
            name: name.trim().to_string(),
            province_id: ids::province_id(country, province),
        }
    }
}

/// A fetchable unit of work: one postal code of one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalArea {
    pub id: String,
    pub code: String,
    pub name: Option<String>,
    pub status_code: Option<u16>,
    pub data: Option<String>,
    pub city_id: String,
}

impl PostalArea {
    #[must_use]
    pub fn new(country: &str, province: &str, city: &str, code: &str, name: Option<&str>) -> Self {
        Self {
            id: ids::postal_area_id(country, code),
            code: ids::normalize_postal_code(code),
            name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            status_code: None,
            data: None,
            city_id: ids::city_id(country, province, city),
        }
    }

    #[must_use]
    pub fn fetch_status(&self) -> FetchStatus {
        FetchStatus::from_code(self.status_code)
    }
}

/// Fetch state derived from the stored HTTP status of a postal area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    /// Never fetched, or the last attempt did not return 200.
    Pending(Option<u16>),
    /// Fetched successfully, excluded from future cycles.
    Fetched,
    /// The endpoint reported that no data exists. Never refetched.
    NoData,
}

impl FetchStatus {
    pub const OK: u16 = 200;
    pub const NO_DATA: u16 = 400;

    #[must_use]
    pub const fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(Self::OK) => Self::Fetched,
            Some(Self::NO_DATA) => Self::NoData,
            other => Self::Pending(other),
        }
    }

    /// Whether the area belongs in a freshly loaded task queue.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        !matches!(self, Self::Fetched)
    }

    #[must_use]
    pub const fn should_fetch(self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateDim {
    pub id: String,
    pub date: String,
}

impl DateDim {
    #[must_use]
    pub fn new(date: &str) -> Self {
        Self { id: ids::date_id(date), date: date.trim().to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourDim {
    pub id: String,
    pub hour: u32,
}

impl HourDim {
    #[must_use]
    pub fn new(hour: u32) -> Self {
        Self { id: ids::hour_id(hour), hour }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
}

impl Component {
    #[must_use]
    pub fn new(canonical_name: &str) -> Self {
        Self {
            id: ids::component_id(canonical_name),
            name: canonical_name.trim().to_string(),
        }
    }
}

/// Fact row: one price amount for an area, date, hour and component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceValue {
    pub postal_area_id: String,
    pub date_id: String,
    pub hour_id: String,
    pub component_id: String,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FetchStatus::from_code(None), FetchStatus::Pending(None));
        assert_eq!(FetchStatus::from_code(Some(404)), FetchStatus::Pending(Some(404)));
        assert_eq!(FetchStatus::from_code(Some(200)), FetchStatus::Fetched);
        assert_eq!(FetchStatus::from_code(Some(400)), FetchStatus::NoData);

        assert!(FetchStatus::NoData.is_queued());
        assert!(!FetchStatus::NoData.should_fetch());
        assert!(!FetchStatus::Fetched.is_queued());
    }

    #[test]
    fn postal_area_links_to_city() {
        let area = PostalArea::new("Testland", "North", "Capital", "10 00", Some("  "));
        assert_eq!(area.code, "1000");
        assert_eq!(area.name, None);
        assert_eq!(area.city_id, City::new("testland", "north", "capital").id);
    }
}
