//! Associations between entity types
//!
//! Associations are directed: `Person -> Address` (one-to-many) and
//! `Address -> Person` (belongs-to) are two entries, one on each side.
//! Source and target are entity type names; join tables are table names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    BelongsTo,
    OneToMany,
    ManyToMany,
    BelongsToPolymorphic,
    OneToManyPolymorphic,
}

/// A relationship from one entity type to another.
///
/// Equality covers every field, so two associations are the same exactly
/// when kind, source, target and their distinguishing key names agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Association {
    /// Source rows carry `fk_name` pointing at the target
    BelongsTo {
        source: String,
        target: String,
        fk_name: String,
    },
    /// Target rows carry `fk_name` pointing at the source
    OneToMany {
        source: String,
        target: String,
        fk_name: String,
    },
    /// Rows of `join` pair `source_fk` with `target_fk`
    ManyToMany {
        source: String,
        target: String,
        join: String,
        source_fk: String,
        target_fk: String,
    },
    /// Source rows carry `parent_id` and `parent_type = type_label`
    BelongsToPolymorphic {
        source: String,
        target: String,
        type_label: String,
    },
    /// Target rows carry `parent_id` and `parent_type = type_label`
    OneToManyPolymorphic {
        source: String,
        target: String,
        type_label: String,
    },
}

impl Association {
    pub fn kind(&self) -> AssociationKind {
        match self {
            Association::BelongsTo { .. } => AssociationKind::BelongsTo,
            Association::OneToMany { .. } => AssociationKind::OneToMany,
            Association::ManyToMany { .. } => AssociationKind::ManyToMany,
            Association::BelongsToPolymorphic { .. } => AssociationKind::BelongsToPolymorphic,
            Association::OneToManyPolymorphic { .. } => AssociationKind::OneToManyPolymorphic,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Association::BelongsTo { source, .. }
            | Association::OneToMany { source, .. }
            | Association::ManyToMany { source, .. }
            | Association::BelongsToPolymorphic { source, .. }
            | Association::OneToManyPolymorphic { source, .. } => source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Association::BelongsTo { target, .. }
            | Association::OneToMany { target, .. }
            | Association::ManyToMany { target, .. }
            | Association::BelongsToPolymorphic { target, .. }
            | Association::OneToManyPolymorphic { target, .. } => target,
        }
    }

    /// Foreign key column of a plain one-to-many or belongs-to
    pub fn fk_name(&self) -> Option<&str> {
        match self {
            Association::BelongsTo { fk_name, .. } | Association::OneToMany { fk_name, .. } => Some(fk_name),
            _ => None,
        }
    }

    pub fn join_table(&self) -> Option<&str> {
        match self {
            Association::ManyToMany { join, .. } => Some(join),
            _ => None,
        }
    }

    pub fn type_label(&self) -> Option<&str> {
        match self {
            Association::BelongsToPolymorphic { type_label, .. }
            | Association::OneToManyPolymorphic { type_label, .. } => Some(type_label),
            _ => None,
        }
    }

    /// The same relationship seen from the target side.
    pub fn reversed(&self) -> Association {
        match self {
            Association::BelongsTo { source, target, fk_name } => Association::OneToMany {
                source: target.clone(),
                target: source.clone(),
                fk_name: fk_name.clone(),
            },
            Association::OneToMany { source, target, fk_name } => Association::BelongsTo {
                source: target.clone(),
                target: source.clone(),
                fk_name: fk_name.clone(),
            },
            Association::ManyToMany {
                source,
                target,
                join,
                source_fk,
                target_fk,
            } => Association::ManyToMany {
                source: target.clone(),
                target: source.clone(),
                join: join.clone(),
                source_fk: target_fk.clone(),
                target_fk: source_fk.clone(),
            },
            Association::BelongsToPolymorphic {
                source,
                target,
                type_label,
            } => Association::OneToManyPolymorphic {
                source: target.clone(),
                target: source.clone(),
                type_label: type_label.clone(),
            },
            Association::OneToManyPolymorphic {
                source,
                target,
                type_label,
            } => Association::BelongsToPolymorphic {
                source: target.clone(),
                target: source.clone(),
                type_label: type_label.clone(),
            },
        }
    }

    /// Whether rows of the target reference this side, so deleting this
    /// side leaves them dangling
    pub fn is_child_side(&self) -> bool {
        !matches!(
            self,
            Association::BelongsTo { .. } | Association::BelongsToPolymorphic { .. }
        )
    }

    /// Lookup order when a caller asks for "the" association to a target
    pub(crate) fn precedence(&self) -> u8 {
        match self.kind() {
            AssociationKind::BelongsTo => 0,
            AssociationKind::BelongsToPolymorphic => 1,
            AssociationKind::OneToMany => 2,
            AssociationKind::OneToManyPolymorphic => 3,
            AssociationKind::ManyToMany => 4,
        }
    }
}

/// Associations declared on a descriptor. They take precedence over
/// inferred ones of the same kind between the same two types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationOverride {
    BelongsTo {
        parent: String,
        fk_name: Option<String>,
    },
    HasMany {
        child: String,
        fk_name: Option<String>,
    },
    ManyToMany {
        other: String,
        join: String,
        source_fk: String,
        target_fk: String,
    },
    BelongsToPolymorphic {
        parent: String,
        type_label: Option<String>,
    },
}

/// Append unless an equal association is already present.
pub(crate) fn push_unique(list: &mut Vec<Association>, association: Association) -> bool {
    if list.contains(&association) {
        return false;
    }
    list.push(association);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_many_to_many_swaps_keys() {
        let a = Association::ManyToMany {
            source: "Doctor".into(),
            target: "Patient".into(),
            join: "doctors_patients".into(),
            source_fk: "doctor_id".into(),
            target_fk: "patient_id".into(),
        };
        let r = a.reversed();
        assert_eq!(r.source(), "Patient");
        assert_eq!(r.target(), "Doctor");
        assert!(matches!(&r, Association::ManyToMany { source_fk, .. } if source_fk == "patient_id"));
        assert_eq!(r.reversed(), a);
    }

    #[test]
    fn test_duplicates_rejected_by_equality() {
        let mut list = Vec::new();
        let a = Association::OneToMany {
            source: "Person".into(),
            target: "Address".into(),
            fk_name: "person_id".into(),
        };
        assert!(push_unique(&mut list, a.clone()));
        assert!(!push_unique(&mut list, a));
        assert!(push_unique(&mut list, Association::OneToMany {
            source: "Person".into(),
            target: "Address".into(),
            fk_name: "owner_id".into(),
        }));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_serde_tagging() {
        let a = Association::BelongsToPolymorphic {
            source: "Comment".into(),
            target: "Article".into(),
            type_label: "Article".into(),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "belongs_to_polymorphic");
        let back: Association = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }
}
