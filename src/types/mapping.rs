//! Column mapping types
//!
//! The mapping is the only persisted "intent" of an import session:
//! intermediate records and entities are always recomputed from it.

use serde::{Deserialize, Serialize};

/// Normalized target fields a source column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedField {
    BranchCode,
    BranchName,
    Region,
    RouteName,
    RepCode,
    ClientCode,
    ReachCustomerCode,
    CustomerNameEn,
    CustomerNameAr,
    Lat,
    Lng,
    Address,
    Phone,
    Classification,
    WeekNumber,
    DayName,
    VisitOrder,
    Vat,
    District,
    BuyerId,
    StoreType,
}

impl MappedField {
    /// Declaration order doubles as detection priority.
    pub const ALL: [MappedField; 21] = [
        MappedField::BranchCode,
        MappedField::BranchName,
        MappedField::Region,
        MappedField::RouteName,
        MappedField::RepCode,
        MappedField::ClientCode,
        MappedField::ReachCustomerCode,
        MappedField::CustomerNameEn,
        MappedField::CustomerNameAr,
        MappedField::Lat,
        MappedField::Lng,
        MappedField::Address,
        MappedField::Phone,
        MappedField::Classification,
        MappedField::WeekNumber,
        MappedField::DayName,
        MappedField::VisitOrder,
        MappedField::Vat,
        MappedField::District,
        MappedField::BuyerId,
        MappedField::StoreType,
    ];

    pub fn as_key(&self) -> &'static str {
        match self {
            MappedField::BranchCode => "branch_code",
            MappedField::BranchName => "branch_name",
            MappedField::Region => "region",
            MappedField::RouteName => "route_name",
            MappedField::RepCode => "rep_code",
            MappedField::ClientCode => "client_code",
            MappedField::ReachCustomerCode => "reach_customer_code",
            MappedField::CustomerNameEn => "customer_name_en",
            MappedField::CustomerNameAr => "customer_name_ar",
            MappedField::Lat => "lat",
            MappedField::Lng => "lng",
            MappedField::Address => "address",
            MappedField::Phone => "phone",
            MappedField::Classification => "classification",
            MappedField::WeekNumber => "week_number",
            MappedField::DayName => "day_name",
            MappedField::VisitOrder => "visit_order",
            MappedField::Vat => "vat",
            MappedField::District => "district",
            MappedField::BuyerId => "buyer_id",
            MappedField::StoreType => "store_type",
        }
    }
}

/// Mapping from normalized fields to source column names.
///
/// One optional slot per field — typos in string keys cannot propagate
/// silently the way they would in a loose key/value bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub branch_code: Option<String>,
    pub branch_name: Option<String>,
    pub region: Option<String>,
    pub route_name: Option<String>,
    pub rep_code: Option<String>,
    pub client_code: Option<String>,
    pub reach_customer_code: Option<String>,
    pub customer_name_en: Option<String>,
    pub customer_name_ar: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub classification: Option<String>,
    pub week_number: Option<String>,
    pub day_name: Option<String>,
    pub visit_order: Option<String>,
    pub vat: Option<String>,
    pub district: Option<String>,
    pub buyer_id: Option<String>,
    pub store_type: Option<String>,
}

impl ColumnMapping {
    pub fn get(&self, field: MappedField) -> Option<&str> {
        let slot = match field {
            MappedField::BranchCode => &self.branch_code,
            MappedField::BranchName => &self.branch_name,
            MappedField::Region => &self.region,
            MappedField::RouteName => &self.route_name,
            MappedField::RepCode => &self.rep_code,
            MappedField::ClientCode => &self.client_code,
            MappedField::ReachCustomerCode => &self.reach_customer_code,
            MappedField::CustomerNameEn => &self.customer_name_en,
            MappedField::CustomerNameAr => &self.customer_name_ar,
            MappedField::Lat => &self.lat,
            MappedField::Lng => &self.lng,
            MappedField::Address => &self.address,
            MappedField::Phone => &self.phone,
            MappedField::Classification => &self.classification,
            MappedField::WeekNumber => &self.week_number,
            MappedField::DayName => &self.day_name,
            MappedField::VisitOrder => &self.visit_order,
            MappedField::Vat => &self.vat,
            MappedField::District => &self.district,
            MappedField::BuyerId => &self.buyer_id,
            MappedField::StoreType => &self.store_type,
        };
        slot.as_deref()
    }

    pub fn set(&mut self, field: MappedField, source_column: Option<String>) {
        let slot = match field {
            MappedField::BranchCode => &mut self.branch_code,
            MappedField::BranchName => &mut self.branch_name,
            MappedField::Region => &mut self.region,
            MappedField::RouteName => &mut self.route_name,
            MappedField::RepCode => &mut self.rep_code,
            MappedField::ClientCode => &mut self.client_code,
            MappedField::ReachCustomerCode => &mut self.reach_customer_code,
            MappedField::CustomerNameEn => &mut self.customer_name_en,
            MappedField::CustomerNameAr => &mut self.customer_name_ar,
            MappedField::Lat => &mut self.lat,
            MappedField::Lng => &mut self.lng,
            MappedField::Address => &mut self.address,
            MappedField::Phone => &mut self.phone,
            MappedField::Classification => &mut self.classification,
            MappedField::WeekNumber => &mut self.week_number,
            MappedField::DayName => &mut self.day_name,
            MappedField::VisitOrder => &mut self.visit_order,
            MappedField::Vat => &mut self.vat,
            MappedField::District => &mut self.district,
            MappedField::BuyerId => &mut self.buyer_id,
            MappedField::StoreType => &mut self.store_type,
        };
        *slot = source_column;
    }

    /// Apply operator corrections from the mapping-review step.
    pub fn apply_edits(&mut self, edits: &[MappingEdit]) {
        for edit in edits {
            self.set(edit.field, edit.source_column.clone());
        }
    }

    pub fn is_mapped(&self, field: MappedField) -> bool {
        self.get(field).is_some()
    }
}

/// One operator correction: map `field` to `source_column`, or unset it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEdit {
    pub field: MappedField,
    pub source_column: Option<String>,
}

/// Result of validating a mapping before the confirm action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingValidation {
    pub is_valid: bool,
    pub missing_required_fields: Vec<MappedField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_round_trip_all_fields() {
        let mut mapping = ColumnMapping::default();
        for field in MappedField::ALL {
            assert_eq!(mapping.get(field), None);
            mapping.set(field, Some(format!("col_{}", field.as_key())));
        }
        for field in MappedField::ALL {
            assert_eq!(mapping.get(field), Some(format!("col_{}", field.as_key()).as_str()));
        }
    }

    #[test]
    fn test_apply_edits_sets_and_unsets() {
        let mut mapping = ColumnMapping::default();
        mapping.set(MappedField::Lat, Some("latitude".into()));
        mapping.apply_edits(&[
            MappingEdit {
                field: MappedField::Lat,
                source_column: None,
            },
            MappingEdit {
                field: MappedField::RouteName,
                source_column: Some("Journey".into()),
            },
        ]);
        assert_eq!(mapping.get(MappedField::Lat), None);
        assert_eq!(mapping.get(MappedField::RouteName), Some("Journey"));
    }

    #[test]
    fn test_mapped_field_serde_snake_case() {
        let json = serde_json::to_string(&MappedField::CustomerNameAr).unwrap();
        assert_eq!(json, r#""customer_name_ar""#);
        let field: MappedField = serde_json::from_str(r#""reach_customer_code""#).unwrap();
        assert_eq!(field, MappedField::ReachCustomerCode);
    }
}
