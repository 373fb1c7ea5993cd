//! Normalized entities derived from one route-master upload

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Branch code assigned to records that carry neither a branch code nor
/// a branch name, so they never silently disappear from counts.
pub const UNASSIGNED_BRANCH: &str = "Unassigned";

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// (0,0) is the universal placeholder for absent geodata in these
    /// uploads, not a valid equator/meridian position.
    pub fn is_placeholder(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }
}

/// A physical depot/site; root of the tenant's location hierarchy.
///
/// Natural key: `code` if present, else the normalized name. Never
/// deleted by the import pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub code: String,
    pub name: String,
    pub region: Option<String>,
    pub is_active: bool,
    pub coordinates: Option<Coordinates>,
}

/// A named delivery/sales path under one branch.
///
/// Natural key: `(branch_code, name)`. The reported "count" of a route
/// is the number of distinct rep codes referencing it — a business
/// definition (capacity planning by rep headcount), not the row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub branch_code: String,
    pub name: String,
    pub rep_code: Option<String>,
    pub rep_codes: BTreeSet<String>,
    /// Set when at least one source row referenced this route without a
    /// rep code.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_uncoded_rep: bool,
}

impl Route {
    /// Distinct rep codes referencing this route. Rows without a rep
    /// code count as one anonymous rep only when no coded rep exists,
    /// so a route never reports zero.
    pub fn distinct_rep_count(&self) -> usize {
        if self.rep_codes.is_empty() {
            usize::from(self.has_uncoded_rep)
        } else {
            self.rep_codes.len()
        }
    }
}

/// Which source field won the customer natural-key fallback.
///
/// Precedence is strict and must be identical between preview and
/// write: client code, then reach customer code, then English name,
/// then the row number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerKeySource {
    ClientCode,
    ReachCode,
    NameEn,
    RowId,
}

impl CustomerKeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerKeySource::ClientCode => "client_code",
            CustomerKeySource::ReachCode => "reach_code",
            CustomerKeySource::NameEn => "name_en",
            CustomerKeySource::RowId => "row_id",
        }
    }
}

/// A customer (outlet) served by a route.
///
/// Natural key: `(branch_code, key)` where `key` comes from the
/// fallback chain recorded in `key_source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub key: String,
    pub key_source: CustomerKeySource,
    pub branch_code: String,
    pub client_code: Option<String>,
    pub reach_customer_code: Option<String>,
    pub name_en: String,
    pub name_ar: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub classification: Option<String>,
    pub vat: Option<String>,
    pub district: Option<String>,
    pub buyer_id: Option<String>,
    pub store_type: Option<String>,
}

impl Customer {
    /// False when coordinates are absent or the (0,0) placeholder.
    pub fn has_gps(&self) -> bool {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => !(lat == 0.0 && lng == 0.0),
            _ => false,
        }
    }
}

/// A scheduled occurrence of a customer being served by a route.
///
/// Natural key: `(route_name, customer_key, week_number, day_name)`;
/// identical keys collapse to one, last seen wins for the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub route_name: String,
    pub customer_key: String,
    pub week_number: Option<i32>,
    pub day_name: Option<String>,
    pub visit_order: Option<i32>,
    pub rep_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_coordinates() {
        assert!(Coordinates { lat: 0.0, lng: 0.0 }.is_placeholder());
        assert!(!Coordinates { lat: 24.7, lng: 46.6 }.is_placeholder());
    }

    #[test]
    fn test_customer_has_gps_treats_zero_zero_as_missing() {
        let mut customer = sample_customer();
        customer.lat = Some(0.0);
        customer.lng = Some(0.0);
        assert!(!customer.has_gps());

        customer.lat = Some(24.7);
        customer.lng = Some(46.6);
        assert!(customer.has_gps());

        customer.lng = None;
        assert!(!customer.has_gps());
    }

    #[test]
    fn test_route_distinct_rep_count() {
        let mut route = Route {
            branch_code: "B1".into(),
            name: "R1".into(),
            rep_code: Some("U1".into()),
            rep_codes: BTreeSet::from(["U1".to_string(), "U2".to_string()]),
            has_uncoded_rep: false,
        };
        assert_eq!(route.distinct_rep_count(), 2);

        route.rep_codes.clear();
        assert_eq!(route.distinct_rep_count(), 0);

        route.has_uncoded_rep = true;
        assert_eq!(route.distinct_rep_count(), 1);
    }

    fn sample_customer() -> Customer {
        Customer {
            key: "C-104".into(),
            key_source: CustomerKeySource::ClientCode,
            branch_code: "B1".into(),
            client_code: Some("C-104".into()),
            reach_customer_code: None,
            name_en: "Al Noor Market".into(),
            name_ar: None,
            lat: None,
            lng: None,
            address: None,
            phone: None,
            classification: None,
            vat: None,
            district: None,
            buyer_id: None,
            store_type: None,
        }
    }
}
