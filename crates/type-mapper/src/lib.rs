//! Resolves a normalized source column type into a concrete destination
//! column type, per destination vendor.
//!
//! The mapping tables are `const`/`static` data, embedded in the binary —
//! updating a mapping is a code change, not a runtime configuration change,
//! matching the contract this component is built around.

use getl_core::{GetlError, NormalizedType, Vendor};

/// `(normalized type token, alias token to retry under)` — the fixed
/// second-chance rewrite list. Retried once; the alias target is never
/// itself aliased again.
const ALIASES: &[(&str, &str)] = &[
    ("INTEGER", "INT"),
    ("REAL", "FLOAT"),
    ("TEXT", "VARCHAR"),
    ("BLOB", "BLOB"),
];

/// Resolves `normalized_src_type` into `dst_vendor`'s concrete column type.
///
/// Lookup order: (1) exact match in the vendor's table; (2) the type's
/// alias, re-looked-up once; (3) the vendor's ultimate fallback. Returns
/// `UnmappedType` only if all three miss, which does not happen for any
/// vendor in the current tables — every vendor configures a fallback.
pub fn resolve(dst_vendor: Vendor, normalized_src_type: NormalizedType) -> Result<String, GetlError> {
    if let Some(direct) = table(dst_vendor, normalized_src_type) {
        return Ok(direct.to_string());
    }

    if let Some((_, alias_token)) = ALIASES
        .iter()
        .find(|(token, _)| *token == normalized_src_type.as_token())
    {
        let alias_type = NormalizedType::from_token(alias_token);
        if alias_type != normalized_src_type {
            if let Some(via_alias) = table(dst_vendor, alias_type) {
                return Ok(via_alias.to_string());
            }
        }
    }

    default_for(dst_vendor)
        .map(|s| s.to_string())
        .ok_or_else(|| GetlError::UnmappedType {
            vendor: dst_vendor.to_string(),
            normalized_type: normalized_src_type.to_string(),
        })
}

/// The vendor's direct mapping table. Deliberately partial: `Text` is
/// always resolved through the `VARCHAR` alias rather than duplicated, and
/// `VarChar2` (an Oracle-only spelling) is left to the destination
/// default everywhere but Oracle.
fn table(vendor: Vendor, ty: NormalizedType) -> Option<&'static str> {
    use NormalizedType::*;
    match vendor {
        Vendor::Sqlite => match ty {
            Integer => Some("INTEGER"),
            Real => Some("REAL"),
            Blob => Some("BLOB"),
            Boolean => Some("INTEGER"),
            Date => Some("TEXT"),
            DateTime => Some("TEXT"),
            Timestamp => Some("TEXT"),
            Number => Some("NUMERIC"),
            Decimal => Some("NUMERIC"),
            VarChar => Some("TEXT"),
            Clob => Some("TEXT"),
            Float => Some("REAL"),
            Text | VarChar2 => None,
        },
        Vendor::Postgres => match ty {
            Integer => Some("INTEGER"),
            Real => Some("REAL"),
            Blob => Some("BYTEA"),
            Boolean => Some("BOOLEAN"),
            Date => Some("DATE"),
            DateTime => Some("TIMESTAMP"),
            Timestamp => Some("TIMESTAMP"),
            Number => Some("NUMERIC"),
            Decimal => Some("NUMERIC"),
            VarChar => Some("VARCHAR"),
            Clob => Some("TEXT"),
            Float => Some("DOUBLE PRECISION"),
            Text | VarChar2 => None,
        },
        Vendor::MySql => match ty {
            Integer => Some("INT"),
            Real => Some("DOUBLE"),
            Blob => Some("BLOB"),
            Boolean => Some("TINYINT(1)"),
            Date => Some("DATE"),
            DateTime => Some("DATETIME"),
            Timestamp => Some("TIMESTAMP"),
            Number => Some("DECIMAL(65,30)"),
            Decimal => Some("DECIMAL(65,30)"),
            VarChar => Some("VARCHAR(255)"),
            Clob => Some("LONGTEXT"),
            Float => Some("FLOAT"),
            Text | VarChar2 => None,
        },
        Vendor::Oracle => match ty {
            Integer => Some("NUMBER(19)"),
            Real => Some("FLOAT"),
            Blob => Some("BLOB"),
            Boolean => Some("NUMBER(1)"),
            Date => Some("DATE"),
            DateTime => Some("TIMESTAMP"),
            Timestamp => Some("TIMESTAMP"),
            Number => Some("NUMBER"),
            Decimal => Some("NUMBER"),
            VarChar => Some("VARCHAR2(4000)"),
            VarChar2 => Some("VARCHAR2(4000)"),
            Clob => Some("CLOB"),
            Float => Some("FLOAT"),
            Text => None,
        },
        Vendor::SqlServer => match ty {
            Integer => Some("INT"),
            Real => Some("REAL"),
            Blob => Some("VARBINARY(MAX)"),
            Boolean => Some("BIT"),
            Date => Some("DATE"),
            DateTime => Some("DATETIME2"),
            Timestamp => Some("DATETIME2"),
            Number => Some("NUMERIC"),
            Decimal => Some("NUMERIC"),
            VarChar => Some("VARCHAR(MAX)"),
            Clob => Some("NVARCHAR(MAX)"),
            Float => Some("FLOAT"),
            Text | VarChar2 => None,
        },
    }
}

/// The vendor's ultimate fallback type, used when neither a direct nor an
/// aliased lookup resolves.
fn default_for(vendor: Vendor) -> Option<&'static str> {
    match vendor {
        Vendor::Sqlite => Some("TEXT"),
        Vendor::Postgres => Some("TEXT"),
        Vendor::MySql => Some("VARCHAR(255)"),
        Vendor::Oracle => Some("VARCHAR2(4000)"),
        Vendor::SqlServer => Some("NVARCHAR(MAX)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totality_every_vendor_resolves_every_normalized_type() {
        for vendor in Vendor::ALL {
            for ty in NormalizedType::ALL {
                let resolved = resolve(vendor, ty);
                assert!(
                    resolved.is_ok(),
                    "{vendor} has no mapping for {ty}"
                );
                assert!(!resolved.unwrap().is_empty());
            }
        }
    }

    #[test]
    fn text_resolves_through_the_varchar_alias() {
        assert_eq!(
            resolve(Vendor::Sqlite, NormalizedType::Text).unwrap(),
            "TEXT"
        );
        assert_eq!(
            resolve(Vendor::Postgres, NormalizedType::Text).unwrap(),
            "VARCHAR"
        );
    }

    #[test]
    fn oracle_varchar2_is_specific_non_oracle_falls_back_to_default() {
        assert_eq!(
            resolve(Vendor::Oracle, NormalizedType::VarChar2).unwrap(),
            "VARCHAR2(4000)"
        );
        assert_eq!(
            resolve(Vendor::Postgres, NormalizedType::VarChar2).unwrap(),
            "TEXT"
        );
    }

    #[test]
    fn cross_vendor_scenario_s5() {
        // SQL Server INT -> normalized Integer -> Postgres INTEGER.
        let normalized = NormalizedType::from_token("INT");
        assert_eq!(resolve(Vendor::Postgres, normalized).unwrap(), "INTEGER");

        // DECIMAL -> Postgres NUMERIC.
        let normalized = NormalizedType::from_token("DECIMAL");
        assert_eq!(resolve(Vendor::Postgres, normalized).unwrap(), "NUMERIC");

        // DATETIME -> Postgres TIMESTAMP.
        let normalized = NormalizedType::from_token("DATETIME");
        assert_eq!(resolve(Vendor::Postgres, normalized).unwrap(), "TIMESTAMP");
    }
}
