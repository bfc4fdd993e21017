//! Physical naming rules of the target framework.
//!
//! Remediation for implicit many-to-many relations reuses the join table the
//! framework already created, so the planner must predict that table's name
//! exactly. Every naming decision that depends on the framework goes through
//! [`NamingConvention`].

use super::entity::EntityRef;

/// Naming rules a target framework applies to generated storage.
pub trait NamingConvention: Send + Sync {
    /// Physical table name of an auto-generated many-to-many join table.
    ///
    /// `declaring` is the entity the many-to-many field is declared on.
    fn auto_join_table(&self, declaring: &EntityRef, field: &str) -> String;

    /// Name for an explicit join entity replacing an auto-generated table.
    fn join_entity_name(&self, source: &EntityRef, target: &EntityRef) -> String {
        format!("{}{}Through", source.name, target.name)
    }

    /// Foreign key field name pointing at `entity` from a join entity.
    fn join_field_name(&self, entity: &EntityRef) -> String {
        entity.name.to_lowercase()
    }

    /// Name of the uniqueness constraint over a join entity's two keys.
    fn unique_pair_name(&self, first_field: &str, second_field: &str) -> String {
        format!("unique_{}_{}", first_field, second_field)
    }
}

/// `{app}_{entity}_{field}`, lower-cased and underscore-joined.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNaming;

impl NamingConvention for DefaultNaming {
    fn auto_join_table(&self, declaring: &EntityRef, field: &str) -> String {
        format!(
            "{}_{}_{}",
            declaring.app.to_lowercase(),
            declaring.name.to_lowercase(),
            field.to_lowercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_auto_join_table() {
        let product = EntityRef::new("Catalog", "Product");
        assert_eq!(
            DefaultNaming.auto_join_table(&product, "Tags"),
            "catalog_product_tags"
        );
    }

    #[test]
    fn test_default_join_entity_names() {
        let product = EntityRef::new("catalog", "Product");
        let tag = EntityRef::new("catalog", "Tag");

        assert_eq!(DefaultNaming.join_entity_name(&product, &tag), "ProductTagThrough");
        assert_eq!(DefaultNaming.join_field_name(&product), "product");
        assert_eq!(
            DefaultNaming.unique_pair_name("product", "tag"),
            "unique_product_tag"
        );
    }

    struct PrefixedNaming;

    impl NamingConvention for PrefixedNaming {
        fn auto_join_table(&self, declaring: &EntityRef, field: &str) -> String {
            format!("m2m__{}__{}", declaring.name.to_lowercase(), field)
        }
    }

    #[test]
    fn test_custom_convention_keeps_defaults() {
        let product = EntityRef::new("catalog", "Product");
        let tag = EntityRef::new("catalog", "Tag");

        assert_eq!(PrefixedNaming.auto_join_table(&product, "tags"), "m2m__product__tags");
        assert_eq!(PrefixedNaming.join_entity_name(&product, &tag), "ProductTagThrough");
    }
}
