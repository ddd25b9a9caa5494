//! Relationship kinds (§3 "Relationship kinds").

use serde::{Deserialize, Serialize};

/// A declared relationship on a resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Relationship {
    /// Declared on a foreign-key field; the alias is what clients see. The
    /// foreign key column itself never appears among attributes.
    BelongsTo {
        alias: String,
        foreign_key: String,
        target: String,
    },
    /// Inverse of belongs-to: target resource + foreign key on the target.
    HasMany {
        alias: String,
        target: String,
        foreign_key: String,
    },
    /// Many-to-many via a pivot resource.
    HasManyThrough {
        alias: String,
        target: String,
        pivot: String,
        /// Column on the pivot pointing back at this resource.
        foreign_key: String,
        /// Column on the pivot pointing at the target resource.
        other_key: String,
        /// Skip the pre-insert existence check on the target id for
        /// performance (§4.6, §9 Open Question 2). Default `false`.
        skip_existence_check: bool,
    },
    /// A pair (type field, id field) restricted to an allow-list of target
    /// resource names.
    BelongsToPolymorphic {
        alias: String,
        type_field: String,
        id_field: String,
        targets: Vec<String>,
    },
    /// Inverse of `BelongsToPolymorphic`.
    HasManyViaPolymorphic {
        alias: String,
        target: String,
        type_field: String,
        id_field: String,
        /// The value stored in `type_field` that identifies this resource
        /// as the owner, e.g. `"articles"`.
        owner_type_value: String,
    },
}

impl Relationship {
    pub fn alias(&self) -> &str {
        match self {
            Self::BelongsTo { alias, .. }
            | Self::HasMany { alias, .. }
            | Self::HasManyThrough { alias, .. }
            | Self::BelongsToPolymorphic { alias, .. }
            | Self::HasManyViaPolymorphic { alias, .. } => alias,
        }
    }

    pub fn is_to_one(&self) -> bool {
        matches!(self, Self::BelongsTo { .. } | Self::BelongsToPolymorphic { .. })
    }

    pub fn is_to_many(&self) -> bool {
        !self.is_to_one()
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self, Self::BelongsToPolymorphic { .. } | Self::HasManyViaPolymorphic { .. })
    }

    /// Columns this relationship owns on *this* resource's own table (not
    /// the target's). Used by the Query Planner's §4.4 step 5 rule: these
    /// must always be selected regardless of sparse fieldsets.
    pub fn owned_columns(&self) -> Vec<&str> {
        match self {
            Self::BelongsTo { foreign_key, .. } => vec![foreign_key.as_str()],
            Self::BelongsToPolymorphic { type_field, id_field, .. } => {
                vec![type_field.as_str(), id_field.as_str()]
            }
            Self::HasMany { .. } | Self::HasManyThrough { .. } | Self::HasManyViaPolymorphic { .. } => vec![],
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::BelongsTo { target, .. } => Some(target),
            Self::HasMany { target, .. } => Some(target),
            Self::HasManyThrough { target, .. } => Some(target),
            Self::HasManyViaPolymorphic { target, .. } => Some(target),
            Self::BelongsToPolymorphic { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belongs_to_owned_columns() {
        let rel = Relationship::BelongsTo {
            alias: "author".into(),
            foreign_key: "author_id".into(),
            target: "users".into(),
        };
        assert_eq!(rel.owned_columns(), vec!["author_id"]);
        assert!(rel.is_to_one());
    }

    #[test]
    fn test_has_many_through_is_to_many() {
        let rel = Relationship::HasManyThrough {
            alias: "tags".into(),
            target: "tags".into(),
            pivot: "article_tags".into(),
            foreign_key: "article_id".into(),
            other_key: "tag_id".into(),
            skip_existence_check: false,
        };
        assert!(rel.is_to_many());
        assert!(rel.owned_columns().is_empty());
    }

    #[test]
    fn test_polymorphic_owned_columns() {
        let rel = Relationship::BelongsToPolymorphic {
            alias: "commentable".into(),
            type_field: "commentable_type".into(),
            id_field: "commentable_id".into(),
            targets: vec!["articles".into(), "photos".into()],
        };
        assert_eq!(rel.owned_columns(), vec!["commentable_type", "commentable_id"]);
        assert!(rel.is_polymorphic());
    }
}
