//! Column mapping detection
//!
//! Uploaded route-master files come from many distributor back offices
//! with no agreed header row, frequently mixing English and Arabic
//! column names. Detection proposes a mapping the operator reviews and
//! corrects before confirming; nothing here touches I/O.

use crate::types::{ColumnMapping, MappedField, MappingValidation};

/// Known aliases per normalized field, in normalized form (lowercase,
/// `_`/`-` folded to spaces). English first, Arabic after.
fn aliases(field: MappedField) -> &'static [&'static str] {
    match field {
        MappedField::BranchCode => &[
            "branch code",
            "branch id",
            "region code",
            "site code",
            "depot code",
            "كود الفرع",
        ],
        MappedField::BranchName => &[
            "branch name",
            "branch",
            "site name",
            "depot",
            "الفرع",
            "اسم الفرع",
        ],
        MappedField::Region => &["region", "area", "zone", "المنطقة"],
        MappedField::RouteName => &[
            "route name",
            "route",
            "journey",
            "journey plan",
            "المسار",
            "خط السير",
        ],
        MappedField::RepCode => &[
            "rep code",
            "rep id",
            "rep",
            "salesman code",
            "salesman",
            "sales rep",
            "كود المندوب",
            "المندوب",
        ],
        MappedField::ClientCode => &[
            "client code",
            "customer code",
            "client id",
            "cust code",
            "client",
            "كود العميل",
        ],
        MappedField::ReachCustomerCode => &[
            "reach customer code",
            "reach code",
            "reach id",
            "كود ريتش",
        ],
        MappedField::CustomerNameEn => &[
            "customer name en",
            "customer name",
            "name en",
            "english name",
            "client name",
            "outlet name",
        ],
        MappedField::CustomerNameAr => &[
            "customer name ar",
            "name ar",
            "arabic name",
            "اسم العميل",
            "الاسم العربي",
        ],
        MappedField::Lat => &["lat", "latitude", "خط العرض"],
        MappedField::Lng => &["lng", "lon", "long", "longitude", "خط الطول"],
        MappedField::Address => &["address", "street", "العنوان"],
        MappedField::Phone => &[
            "phone",
            "mobile",
            "telephone",
            "tel",
            "contact number",
            "الجوال",
            "الهاتف",
        ],
        MappedField::Classification => &[
            "classification",
            "class",
            "category",
            "segment",
            "التصنيف",
        ],
        MappedField::WeekNumber => &["week number", "week no", "week", "الأسبوع"],
        MappedField::DayName => &["day name", "visit day", "day", "اليوم"],
        MappedField::VisitOrder => &[
            "visit order",
            "visit sequence",
            "sequence",
            "seq",
            "ترتيب الزيارة",
        ],
        MappedField::Vat => &["vat number", "vat", "tax number", "الرقم الضريبي"],
        MappedField::District => &["district", "neighborhood", "الحي"],
        MappedField::BuyerId => &["buyer id", "buyer code", "buyer", "كود المشتري"],
        MappedField::StoreType => &[
            "store type",
            "shop type",
            "outlet type",
            "نوع المتجر",
        ],
    }
}

/// Fold a header or alias into comparison form: lowercase, trimmed,
/// `_`/`-` as spaces, runs of whitespace collapsed.
fn normalize(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut last_was_space = true;
    for c in header.trim().chars() {
        let c = match c {
            '_' | '-' => ' ',
            other => other,
        };
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Propose a mapping from the header row. Deterministic: identical
/// header lists always produce identical mappings.
///
/// Two passes over all fields: exact case-insensitive alias matches
/// first (global priority), then substring containment. A header
/// claimed in the exact pass can never be stolen by a fuzzy match for
/// a different field.
pub fn detect(headers: &[String]) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();
    let mut claimed = vec![false; headers.len()];
    let mut mapping = ColumnMapping::default();

    for field in MappedField::ALL {
        for (idx, header) in normalized.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            if aliases(field).contains(&header.as_str()) {
                mapping.set(field, Some(headers[idx].clone()));
                claimed[idx] = true;
                break;
            }
        }
    }

    for field in MappedField::ALL {
        if mapping.is_mapped(field) {
            continue;
        }
        for (idx, header) in normalized.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            if aliases(field).iter().any(|alias| header.contains(alias)) {
                mapping.set(field, Some(headers[idx].clone()));
                claimed[idx] = true;
                break;
            }
        }
    }

    mapping
}

/// Fields that must be mapped before an import may be confirmed.
/// Branch identity is satisfied by either the code or the name column.
pub fn validate(mapping: &ColumnMapping) -> MappingValidation {
    let mut missing = Vec::new();

    if !mapping.is_mapped(MappedField::BranchCode) && !mapping.is_mapped(MappedField::BranchName) {
        missing.push(MappedField::BranchCode);
    }
    for field in [
        MappedField::RouteName,
        MappedField::ClientCode,
        MappedField::CustomerNameEn,
        MappedField::Lat,
        MappedField::Lng,
    ] {
        if !mapping.is_mapped(field) {
            missing.push(field);
        }
    }

    MappingValidation {
        is_valid: missing.is_empty(),
        missing_required_fields: missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match_case_insensitive() {
        let mapping = detect(&headers(&["Branch Code", "ROUTE_NAME", "latitude"]));
        assert_eq!(mapping.get(MappedField::BranchCode), Some("Branch Code"));
        assert_eq!(mapping.get(MappedField::RouteName), Some("ROUTE_NAME"));
        assert_eq!(mapping.get(MappedField::Lat), Some("latitude"));
    }

    #[test]
    fn test_exact_beats_fuzzy_globally() {
        // "Region" is an exact alias of the region field; BranchCode
        // lists "region code" and must not steal the plain "Region"
        // header via substring containment.
        let mapping = detect(&headers(&["Region", "Region Code"]));
        assert_eq!(mapping.get(MappedField::Region), Some("Region"));
        assert_eq!(mapping.get(MappedField::BranchCode), Some("Region Code"));
    }

    #[test]
    fn test_substring_fallback() {
        let mapping = detect(&headers(&["Customer Latitude (GPS)", "Customer Longitude (GPS)"]));
        assert_eq!(mapping.get(MappedField::Lat), Some("Customer Latitude (GPS)"));
        assert_eq!(mapping.get(MappedField::Lng), Some("Customer Longitude (GPS)"));
    }

    #[test]
    fn test_arabic_aliases() {
        let mapping = detect(&headers(&["اسم العميل", "كود العميل", "المسار"]));
        assert_eq!(mapping.get(MappedField::CustomerNameAr), Some("اسم العميل"));
        assert_eq!(mapping.get(MappedField::ClientCode), Some("كود العميل"));
        assert_eq!(mapping.get(MappedField::RouteName), Some("المسار"));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let hs = headers(&[
            "Branch", "Route", "Client Code", "Customer Name", "Lat", "Lng", "Week", "Day",
        ]);
        let first = detect(&hs);
        for _ in 0..5 {
            assert_eq!(detect(&hs), first);
        }
    }

    #[test]
    fn test_unresolved_fields_left_unset() {
        let mapping = detect(&headers(&["Route", "Remarks"]));
        assert_eq!(mapping.get(MappedField::RouteName), Some("Route"));
        assert_eq!(mapping.get(MappedField::Vat), None);
        assert_eq!(mapping.get(MappedField::StoreType), None);
    }

    #[test]
    fn test_validate_reports_missing_required() {
        let mapping = detect(&headers(&["Route", "Client Code"]));
        let validation = validate(&mapping);
        assert!(!validation.is_valid);
        assert!(validation
            .missing_required_fields
            .contains(&MappedField::BranchCode));
        assert!(validation
            .missing_required_fields
            .contains(&MappedField::CustomerNameEn));
        assert!(validation.missing_required_fields.contains(&MappedField::Lat));
        assert!(!validation
            .missing_required_fields
            .contains(&MappedField::RouteName));
    }

    #[test]
    fn test_branch_name_satisfies_branch_requirement() {
        let mapping = detect(&headers(&[
            "Branch Name",
            "Route",
            "Client Code",
            "Customer Name",
            "Lat",
            "Lng",
        ]));
        let validation = validate(&mapping);
        assert!(validation.is_valid, "missing: {:?}", validation.missing_required_fields);
    }
}
