//! Entity extraction
//!
//! Derives the four normalized entities and their associations from the
//! full intermediate record set in a single pass. Deduplication is an
//! explicit ordered map keyed by each entity's natural key: first-seen
//! wins for identity, and empty fields are upgraded in place when a
//! later record supplies a value — a populated field is never
//! overwritten with an empty one. Output order is first-seen order, so
//! repeated runs over identical input are byte-identical.
//!
//! The preview screen and the final write both go through this module;
//! that is what keeps preview counts equal to write counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    Branch, Coordinates, Customer, CustomerKeySource, EntityPreview, IntermediateRecord,
    PreviewStats, Route, Visit, UNASSIGNED_BRANCH,
};

/// How many entities of each kind the preview sample carries.
pub const PREVIEW_SAMPLE_SIZE: usize = 5;

const KEY_SEP: char = '\u{1f}';

/// Aggregate counts computed during extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractStats {
    pub record_count: usize,
    /// Customers with no usable coordinates, counting the (0,0)
    /// placeholder as missing.
    pub missing_gps_count: usize,
    /// Sum over routes of distinct rep codes referencing each route —
    /// the business-defined "active routes" figure, not the number of
    /// route rows.
    pub active_route_count: usize,
}

/// The four entity sets plus stats, in first-seen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntities {
    pub branches: Vec<Branch>,
    pub routes: Vec<Route>,
    pub customers: Vec<Customer>,
    pub visits: Vec<Visit>,
    pub stats: ExtractStats,
}

impl ExtractedEntities {
    pub fn preview_stats(&self) -> PreviewStats {
        PreviewStats {
            branches: EntityPreview {
                count: self.branches.len(),
                sample: self.branches.iter().take(PREVIEW_SAMPLE_SIZE).cloned().collect(),
            },
            routes: EntityPreview {
                count: self.stats.active_route_count,
                sample: self.routes.iter().take(PREVIEW_SAMPLE_SIZE).cloned().collect(),
            },
            customers: EntityPreview {
                count: self.customers.len(),
                sample: self.customers.iter().take(PREVIEW_SAMPLE_SIZE).cloned().collect(),
            },
            visits: EntityPreview {
                count: self.visits.len(),
                sample: self.visits.iter().take(PREVIEW_SAMPLE_SIZE).cloned().collect(),
            },
            missing_gps_count: self.stats.missing_gps_count,
        }
    }
}

/// Insertion-ordered map: dedup by key, stable first-seen iteration.
struct OrderedMap<T> {
    index: HashMap<String, usize>,
    items: Vec<T>,
}

impl<T> OrderedMap<T> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            items: Vec::new(),
        }
    }

    fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> T) -> &mut T {
        let slot = match self.index.get(key) {
            Some(&existing) => existing,
            None => {
                let position = self.items.len();
                self.index.insert(key.to_string(), position);
                self.items.push(make());
                position
            }
        };
        &mut self.items[slot]
    }

    fn into_items(self) -> Vec<T> {
        self.items
    }
}

fn norm(value: &str) -> String {
    value.trim().to_lowercase()
}

fn valid_coordinates(lat: Option<f64>, lng: Option<f64>) -> Option<Coordinates> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            let coords = Coordinates { lat, lng };
            if coords.is_placeholder() {
                None
            } else {
                Some(coords)
            }
        }
        _ => None,
    }
}

/// Resolve the branch identity of a record: code wins, then name, then
/// the `"Unassigned"` sentinel so the record never drops out of counts.
fn branch_identity(record: &IntermediateRecord) -> (String, String) {
    match (&record.branch_code, &record.branch_name) {
        (Some(code), Some(name)) => (code.clone(), name.clone()),
        (Some(code), None) => (code.clone(), code.clone()),
        (None, Some(name)) => (name.clone(), name.clone()),
        (None, None) => (UNASSIGNED_BRANCH.to_string(), UNASSIGNED_BRANCH.to_string()),
    }
}

/// Customer natural-key fallback: client code, then reach customer
/// code, then English name, then the row number. First match wins and
/// the precedence never changes between preview and write.
fn customer_key(record: &IntermediateRecord) -> (String, CustomerKeySource) {
    if let Some(code) = &record.client_code {
        (code.clone(), CustomerKeySource::ClientCode)
    } else if let Some(code) = &record.reach_customer_code {
        (code.clone(), CustomerKeySource::ReachCode)
    } else if let Some(name) = &record.customer_name_en {
        (name.clone(), CustomerKeySource::NameEn)
    } else {
        (format!("row-{}", record.row_number), CustomerKeySource::RowId)
    }
}

fn upgrade(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(v) = value {
            *slot = Some(v.clone());
        }
    }
}

/// Single-pass extractor. `push` one record at a time (callers chunk
/// large inputs and yield between chunks), then `finish`.
pub struct Extractor {
    branches: OrderedMap<Branch>,
    routes: OrderedMap<Route>,
    customers: OrderedMap<Customer>,
    visits: OrderedMap<Visit>,
    record_count: usize,
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            branches: OrderedMap::new(),
            routes: OrderedMap::new(),
            customers: OrderedMap::new(),
            visits: OrderedMap::new(),
            record_count: 0,
        }
    }

    pub fn push(&mut self, record: &IntermediateRecord) {
        self.record_count += 1;

        let (branch_code, branch_name) = branch_identity(record);
        let branch_key = norm(&branch_code);
        let coords = valid_coordinates(record.lat, record.lng);

        let branch = self.branches.get_or_insert_with(&branch_key, || Branch {
            code: branch_code.clone(),
            name: branch_name.clone(),
            region: None,
            is_active: true,
            coordinates: None,
        });
        branch.is_active = true;
        upgrade(&mut branch.region, &record.region);
        if branch.coordinates.is_none() {
            branch.coordinates = coords;
        }

        if let Some(route_name) = &record.route_name {
            let route_key = format!("{}{}{}", branch_key, KEY_SEP, norm(route_name));
            let route = self.routes.get_or_insert_with(&route_key, || Route {
                branch_code: branch_code.clone(),
                name: route_name.clone(),
                rep_code: None,
                rep_codes: Default::default(),
                has_uncoded_rep: false,
            });
            match &record.rep_code {
                Some(rep) => {
                    route.rep_codes.insert(rep.clone());
                    if route.rep_code.is_none() {
                        route.rep_code = Some(rep.clone());
                    }
                }
                None => route.has_uncoded_rep = true,
            }
        }

        let (key, key_source) = customer_key(record);
        let customer_map_key = format!("{}{}{}", branch_key, KEY_SEP, key);
        let customer = self.customers.get_or_insert_with(&customer_map_key, || Customer {
            key: key.clone(),
            key_source,
            branch_code: branch_code.clone(),
            client_code: None,
            reach_customer_code: None,
            name_en: record.customer_name_en.clone().unwrap_or_else(|| key.clone()),
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
        });
        upgrade(&mut customer.client_code, &record.client_code);
        upgrade(&mut customer.reach_customer_code, &record.reach_customer_code);
        upgrade(&mut customer.name_ar, &record.customer_name_ar);
        upgrade(&mut customer.address, &record.address);
        upgrade(&mut customer.phone, &record.phone);
        upgrade(&mut customer.classification, &record.classification);
        upgrade(&mut customer.vat, &record.vat);
        upgrade(&mut customer.district, &record.district);
        upgrade(&mut customer.buyer_id, &record.buyer_id);
        upgrade(&mut customer.store_type, &record.store_type);
        // A name that fell back to the key is still "empty" for merging.
        if customer.name_en == customer.key {
            if let Some(name) = &record.customer_name_en {
                customer.name_en = name.clone();
            }
        }
        // The (0,0) placeholder counts as empty, so real coordinates
        // seen later replace it.
        if !customer.has_gps() {
            if let Some(c) = coords {
                customer.lat = Some(c.lat);
                customer.lng = Some(c.lng);
            } else if customer.lat.is_none() && customer.lng.is_none() {
                customer.lat = record.lat;
                customer.lng = record.lng;
            }
        }

        if let Some(route_name) = &record.route_name {
            let week = record.week_number.map(|w| w.to_string()).unwrap_or_default();
            let day = record.day_name.as_deref().map(norm).unwrap_or_default();
            let visit_key = format!(
                "{}{}{}{}{}{}{}",
                norm(route_name),
                KEY_SEP,
                customer_map_key,
                KEY_SEP,
                week,
                KEY_SEP,
                day
            );
            let visit = self.visits.get_or_insert_with(&visit_key, || Visit {
                route_name: route_name.clone(),
                customer_key: key.clone(),
                week_number: record.week_number,
                day_name: record.day_name.clone(),
                visit_order: None,
                rep_code: None,
            });
            // Non-key fields: last seen wins.
            visit.visit_order = record.visit_order;
            visit.rep_code = record.rep_code.clone();
        }
    }

    pub fn finish(self) -> ExtractedEntities {
        let branches = self.branches.into_items();
        let routes = self.routes.into_items();
        let customers = self.customers.into_items();
        let visits = self.visits.into_items();

        let stats = ExtractStats {
            record_count: self.record_count,
            missing_gps_count: customers.iter().filter(|c| !c.has_gps()).count(),
            active_route_count: routes.iter().map(Route::distinct_rep_count).sum(),
        };

        ExtractedEntities {
            branches,
            routes,
            customers,
            visits,
            stats,
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract all four entity sets from the full record set.
pub fn extract(records: &[IntermediateRecord]) -> ExtractedEntities {
    let mut extractor = Extractor::new();
    for record in records {
        extractor.push(record);
    }
    extractor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(row_number: usize) -> IntermediateRecord {
        IntermediateRecord {
            row_number,
            ..Default::default()
        }
    }

    fn full_record(row_number: usize) -> IntermediateRecord {
        IntermediateRecord {
            row_number,
            branch_code: Some("B1".into()),
            branch_name: Some("Riyadh Central".into()),
            route_name: Some("R1".into()),
            rep_code: Some("U1".into()),
            client_code: Some(format!("C-{}", row_number)),
            customer_name_en: Some(format!("Customer {}", row_number)),
            lat: Some(24.7),
            lng: Some(46.6),
            week_number: Some(1),
            day_name: Some("Sunday".into()),
            visit_order: Some(row_number as i32),
            ..Default::default()
        }
    }

    #[test]
    fn test_branch_dedup_first_seen_wins() {
        let mut a = full_record(1);
        a.branch_name = Some("Riyadh Central".into());
        let mut b = full_record(2);
        b.branch_code = Some("b1".into()); // different case, same key
        b.branch_name = Some("Renamed Later".into());

        let out = extract(&[a, b]);
        assert_eq!(out.branches.len(), 1);
        assert_eq!(out.branches[0].code, "B1");
        assert_eq!(out.branches[0].name, "Riyadh Central");
    }

    #[test]
    fn test_non_destructive_upgrade_of_empty_fields() {
        let mut first = full_record(1);
        first.lat = None;
        first.lng = None;
        first.address = None;
        first.region = None;
        let mut second = full_record(2);
        second.client_code = first.client_code.clone();
        second.customer_name_en = Some("Should Not Replace".into());
        second.address = Some("King Fahd Rd".into());
        second.region = Some("Central".into());

        let out = extract(&[first, second]);
        assert_eq!(out.customers.len(), 1);
        let customer = &out.customers[0];
        // Empty fields were filled in...
        assert_eq!(customer.address.as_deref(), Some("King Fahd Rd"));
        assert_eq!(customer.lat, Some(24.7));
        // ...but populated ones were not overwritten.
        assert_eq!(customer.name_en, "Customer 1");
        assert_eq!(out.branches[0].region.as_deref(), Some("Central"));
    }

    #[test]
    fn test_zero_zero_placeholder_upgraded_by_real_coordinates() {
        let mut first = full_record(1);
        first.lat = Some(0.0);
        first.lng = Some(0.0);
        let mut second = full_record(2);
        second.client_code = first.client_code.clone();

        let out = extract(&[first, second]);
        assert_eq!(out.customers[0].lat, Some(24.7));
        assert_eq!(out.customers[0].lng, Some(46.6));
        assert_eq!(out.stats.missing_gps_count, 0);
    }

    #[test]
    fn test_missing_gps_counts_null_and_placeholder() {
        let mut with_gps = full_record(1);
        with_gps.lat = Some(24.7);
        with_gps.lng = Some(46.6);
        let mut placeholder = full_record(2);
        placeholder.lat = Some(0.0);
        placeholder.lng = Some(0.0);
        let mut absent = full_record(3);
        absent.lat = None;
        absent.lng = None;

        let out = extract(&[with_gps, placeholder, absent]);
        assert_eq!(out.customers.len(), 3);
        assert_eq!(out.stats.missing_gps_count, 2);
    }

    #[test]
    fn test_route_count_is_distinct_rep_codes() {
        let mut rows = Vec::new();
        for rep in ["U1", "U1", "U2"] {
            let mut r = full_record(rows.len() + 1);
            r.rep_code = Some(rep.into());
            rows.push(r);
        }
        let out = extract(&rows);
        assert_eq!(out.routes.len(), 1);
        assert_eq!(out.routes[0].distinct_rep_count(), 2);
        assert_eq!(out.stats.active_route_count, 2);
        assert_eq!(out.preview_stats().routes.count, 2);
    }

    #[test]
    fn test_customer_key_fallback_precedence() {
        let mut by_reach = record(7);
        by_reach.branch_code = Some("B1".into());
        by_reach.reach_customer_code = Some("RC-9".into());
        by_reach.customer_name_en = Some("Al Noor".into());

        let out = extract(&[by_reach.clone()]);
        assert_eq!(out.customers[0].key, "RC-9");
        assert_eq!(out.customers[0].key_source, CustomerKeySource::ReachCode);

        // Setting client_code (holding everything else fixed) must
        // deterministically switch the key source.
        let mut by_client = by_reach;
        by_client.client_code = Some("C-1".into());
        let out = extract(&[by_client]);
        assert_eq!(out.customers[0].key, "C-1");
        assert_eq!(out.customers[0].key_source, CustomerKeySource::ClientCode);
    }

    #[test]
    fn test_customer_key_falls_back_to_name_then_row() {
        let mut by_name = record(3);
        by_name.branch_code = Some("B1".into());
        by_name.customer_name_en = Some("Al Noor".into());
        let mut by_row = record(4);
        by_row.branch_code = Some("B1".into());

        let out = extract(&[by_name, by_row]);
        assert_eq!(out.customers[0].key, "Al Noor");
        assert_eq!(out.customers[0].key_source, CustomerKeySource::NameEn);
        assert_eq!(out.customers[1].key, "row-4");
        assert_eq!(out.customers[1].key_source, CustomerKeySource::RowId);
    }

    #[test]
    fn test_unassigned_branch_sentinel() {
        let orphan = record(1);
        let out = extract(&[orphan]);
        assert_eq!(out.branches.len(), 1);
        assert_eq!(out.branches[0].code, UNASSIGNED_BRANCH);
        assert_eq!(out.branches[0].name, UNASSIGNED_BRANCH);
        assert_eq!(out.customers[0].branch_code, UNASSIGNED_BRANCH);
    }

    #[test]
    fn test_visits_collapse_on_identical_key_last_seen_wins() {
        let mut first = full_record(1);
        first.visit_order = Some(1);
        let mut second = full_record(2);
        second.client_code = first.client_code.clone();
        second.visit_order = Some(9);

        let out = extract(&[first, second]);
        assert_eq!(out.visits.len(), 1);
        assert_eq!(out.visits[0].visit_order, Some(9));
    }

    #[test]
    fn test_distinct_week_day_make_distinct_visits() {
        let mut sunday = full_record(1);
        sunday.day_name = Some("Sunday".into());
        let mut tuesday = full_record(2);
        tuesday.client_code = sunday.client_code.clone();
        tuesday.day_name = Some("Tuesday".into());
        let mut week_two = full_record(3);
        week_two.client_code = sunday.client_code.clone();
        week_two.week_number = Some(2);

        let out = extract(&[sunday, tuesday, week_two]);
        assert_eq!(out.visits.len(), 3);
    }

    #[test]
    fn test_output_order_is_stable_first_seen() {
        let rows: Vec<IntermediateRecord> = (1..=50).rev().map(full_record).collect();
        let first = extract(&rows);
        let second = extract(&rows);

        let keys: Vec<&str> = first.customers.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys[0], "C-50");
        assert_eq!(keys[49], "C-1");
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_incremental_push_equals_batch_extract() {
        let rows: Vec<IntermediateRecord> = (1..=20).map(full_record).collect();
        let batch = extract(&rows);

        let mut extractor = Extractor::new();
        for chunk in rows.chunks(7) {
            for r in chunk {
                extractor.push(r);
            }
        }
        let incremental = extractor.finish();
        assert_eq!(
            serde_json::to_string(&batch).unwrap(),
            serde_json::to_string(&incremental).unwrap()
        );
    }
}
