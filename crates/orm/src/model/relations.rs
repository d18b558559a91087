//! Association reads and writes on an instance

use crate::connection::Session;
use crate::error::{OrmError, OrmResult};
use crate::inflector;
use crate::lazy_list::LazyList;
use crate::metadata::{Association, AssociationKind};
use crate::value::DatabaseValue;

use super::persistence::purge;
use super::Model;

/// Result of a name-based association lookup
#[derive(Debug)]
pub enum Related {
    Parent(Option<Model>),
    Children(LazyList),
}

impl Model {
    /// The parent this instance belongs to, through a belongs-to or a
    /// polymorphic belongs-to association.
    pub async fn parent(&self, session: &mut Session, target: &str) -> OrmResult<Option<Model>> {
        if let Some(parent) = self.cached_parent(target) {
            return Ok(Some(parent.clone()));
        }
        let association = self
            .meta
            .association_of_kind(target, AssociationKind::BelongsTo)
            .or_else(|| self.meta.association_of_kind(target, AssociationKind::BelongsToPolymorphic))
            .cloned()
            .ok_or_else(|| self.not_associated(target))?;

        let parent_id = match &association {
            Association::BelongsTo { fk_name, .. } => self.attribute(fk_name).cloned(),
            Association::BelongsToPolymorphic { type_label, .. } => {
                match self.attribute("parent_type").and_then(DatabaseValue::as_str) {
                    Some(label) if label == type_label => self.attribute("parent_id").cloned(),
                    _ => None,
                }
            }
            _ => None,
        };
        let Some(parent_id) = parent_id.filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let target_meta = session.metamodel(target).await?;
        let condition = format!("{} = ?", target_meta.id_name());
        let mut list = LazyList::new(target_meta, condition, vec![parent_id]);
        Ok(list.first(session).await?.cloned())
    }

    /// Children through a one-to-many, polymorphic or many-to-many
    /// association. Children attached by an eager load are returned
    /// without a query.
    pub async fn children(&self, session: &mut Session, target: &str) -> OrmResult<LazyList> {
        let association = self.child_association(target)?;
        let target_meta = session.metamodel(target).await?;
        if let Some(children) = self.cached_children(target) {
            return Ok(LazyList::preloaded(target_meta, children.to_vec()));
        }
        let id = self.persisted_id("read children of")?;

        let list = match &association {
            Association::OneToMany { fk_name, .. } => LazyList::new(target_meta, format!("{} = ?", fk_name), vec![id]),
            Association::OneToManyPolymorphic { type_label, .. } => LazyList::new(
                target_meta,
                "parent_id = ? AND parent_type = ?",
                vec![id, DatabaseValue::from(type_label.as_str())],
            ),
            Association::ManyToMany {
                join,
                source_fk,
                target_fk,
                ..
            } => {
                let condition = format!(
                    "{} IN (SELECT {} FROM {} WHERE {} = ?)",
                    target_meta.id_name(),
                    target_fk,
                    join,
                    source_fk
                );
                LazyList::new(target_meta, condition, vec![id])
            }
            _ => return Err(self.not_associated(target)),
        };
        Ok(list)
    }

    /// Associate a child with this persisted instance.
    ///
    /// A one-to-many or polymorphic child gets its foreign key set and is
    /// saved (validation failures are errors). A many-to-many partner is
    /// saved if new, then linked by one join row.
    pub async fn add(&self, session: &mut Session, child: &mut Model) -> OrmResult<()> {
        let id = self.persisted_id("add children to")?;
        let target = child.type_name().to_string();
        match self.child_association(&target)? {
            Association::OneToMany { fk_name, .. } => {
                child.set(&fk_name, id)?;
                child.save_it(session).await?;
            }
            Association::OneToManyPolymorphic { type_label, .. } => {
                child.set("parent_id", id)?;
                child.set("parent_type", type_label)?;
                child.save_it(session).await?;
            }
            Association::ManyToMany {
                join,
                source_fk,
                target_fk,
                ..
            } => {
                if child.is_new() {
                    child.save_it(session).await?;
                }
                let child_id = child.persisted_id("link")?;
                let db = self.meta.db_name().to_string();
                let sql = session.dialect(&db)?.add_join_row(&join, &source_fk, &target_fk);
                session.exec(&db, &sql, &[id, child_id]).await?;
                self.purge_link(session, child, &join);
            }
            _ => return Err(self.not_associated(&target)),
        }
        Ok(())
    }

    /// Dissociate a child. One-to-many and polymorphic children are
    /// deleted; for many-to-many only the join row goes. Returns the
    /// number of rows removed.
    pub async fn remove(&self, session: &mut Session, child: &mut Model) -> OrmResult<u64> {
        let id = self.persisted_id("remove children from")?;
        if child.is_frozen() || child.is_new() {
            return Err(OrmError::IllegalArgument(format!(
                "cannot remove a '{}' that does not exist in the database",
                child.type_name()
            )));
        }
        let target = child.type_name().to_string();
        match self.child_association(&target)? {
            Association::OneToMany { .. } | Association::OneToManyPolymorphic { .. } => {
                Ok(if child.delete(session).await? { 1 } else { 0 })
            }
            Association::ManyToMany {
                join,
                source_fk,
                target_fk,
                ..
            } => {
                let child_id = child.persisted_id("unlink")?;
                let db = self.meta.db_name().to_string();
                let sql = session.dialect(&db)?.remove_join_row(&join, &source_fk, &target_fk);
                let removed = session.exec(&db, &sql, &[id, child_id]).await?;
                self.purge_link(session, child, &join);
                Ok(removed)
            }
            _ => Err(self.not_associated(&target)),
        }
    }

    /// Point this instance at a parent. The change is saved with the
    /// next `save`.
    pub fn set_parent(&mut self, parent: &Model) -> OrmResult<&mut Self> {
        let target = parent.type_name();
        let association = self
            .meta
            .association_of_kind(target, AssociationKind::BelongsTo)
            .or_else(|| self.meta.association_of_kind(target, AssociationKind::BelongsToPolymorphic))
            .cloned()
            .ok_or_else(|| self.not_associated(target))?;
        let id = parent.persisted_id("be a parent of")?;
        match association {
            Association::BelongsTo { fk_name, .. } => self.set(&fk_name, id),
            Association::BelongsToPolymorphic { type_label, .. } => {
                self.set("parent_id", id)?;
                self.set("parent_type", type_label)
            }
            _ => Err(self.not_associated(target)),
        }
    }

    /// Resolve an association from a plain name such as `"user"` or
    /// `"addresses"`.
    ///
    /// Only available when `name_inference` is enabled; typed code should
    /// call [`Model::parent`] or [`Model::children`] instead.
    pub async fn related(&self, session: &mut Session, name: &str) -> OrmResult<Related> {
        if !session.registry().config().name_inference {
            return Err(OrmError::IllegalArgument(format!(
                "name inference is disabled; cannot resolve '{}'",
                name
            )));
        }
        let wanted = name.to_lowercase();

        let mut associations: Vec<&Association> = self.meta.associations().iter().collect();
        associations.sort_by_key(|a| a.precedence());
        for association in associations {
            let target = association.target();
            let short = inflector::underscore(inflector::short_type_name(target));
            match association.kind() {
                AssociationKind::BelongsTo | AssociationKind::BelongsToPolymorphic if short == wanted => {
                    return Ok(Related::Parent(self.parent(session, target).await?));
                }
                AssociationKind::OneToMany | AssociationKind::OneToManyPolymorphic | AssociationKind::ManyToMany
                    if inflector::pluralize(&short) == wanted =>
                {
                    return Ok(Related::Children(self.children(session, target).await?));
                }
                _ => {}
            }
        }
        Err(OrmError::AttributeNotFound {
            attribute: name.to_string(),
            table: self.meta.table_name().to_string(),
        })
    }

    fn child_association(&self, target: &str) -> OrmResult<Association> {
        [
            AssociationKind::OneToMany,
            AssociationKind::ManyToMany,
            AssociationKind::OneToManyPolymorphic,
        ]
        .into_iter()
        .find_map(|kind| self.meta.association_of_kind(target, kind))
        .cloned()
        .ok_or_else(|| self.not_associated(target))
    }

    fn persisted_id(&self, action: &str) -> OrmResult<DatabaseValue> {
        self.id().cloned().ok_or_else(|| {
            OrmError::IllegalArgument(format!(
                "cannot {} a '{}' that has not been saved",
                action,
                self.type_name()
            ))
        })
    }

    fn not_associated(&self, target: &str) -> OrmError {
        OrmError::NotAssociated {
            source_type: self.type_name().to_string(),
            target_type: target.to_string(),
        }
    }

    fn purge_link(&self, session: &Session, child: &Model, join: &str) {
        let db = self.meta.db_name();
        session.registry().purge(db, join, join);
        purge(session, &self.meta, &session.table_name(&self.meta));
        purge(session, &child.meta, &session.table_name(&child.meta));
    }
}
