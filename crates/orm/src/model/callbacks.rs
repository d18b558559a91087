//! Lifecycle hooks run around validation, persistence and loading

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OrmResult;
use crate::model::Model;

/// Lifecycle hooks registered on an entity descriptor.
///
/// Every hook defaults to a no-op. An error returned from a `before_*`
/// hook aborts the operation before any SQL is issued.
#[async_trait]
pub trait ModelCallbacks: Send + Sync {
    async fn before_save(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_save(&self, _model: &Model) -> OrmResult<()> {
        Ok(())
    }

    async fn before_create(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_create(&self, _model: &Model) -> OrmResult<()> {
        Ok(())
    }

    async fn before_update(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_update(&self, _model: &Model) -> OrmResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_delete(&self, _model: &Model) -> OrmResult<()> {
        Ok(())
    }

    async fn before_validation(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_validation(&self, _model: &Model) -> OrmResult<()> {
        Ok(())
    }

    async fn after_load(&self, _model: &mut Model) -> OrmResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeValidation,
    AfterValidation,
    AfterLoad,
}

/// Run one hook of every callback registered for the model's type, in
/// registration order. The first error stops the chain.
pub(crate) async fn trigger(model: &mut Model, hook: Hook) -> OrmResult<()> {
    if model.meta().callbacks().is_empty() {
        return Ok(());
    }
    let callbacks: Vec<Arc<dyn ModelCallbacks>> = model.meta().callbacks().to_vec();
    for callback in callbacks {
        match hook {
            Hook::BeforeSave => callback.before_save(model).await?,
            Hook::AfterSave => callback.after_save(model).await?,
            Hook::BeforeCreate => callback.before_create(model).await?,
            Hook::AfterCreate => callback.after_create(model).await?,
            Hook::BeforeUpdate => callback.before_update(model).await?,
            Hook::AfterUpdate => callback.after_update(model).await?,
            Hook::BeforeDelete => callback.before_delete(model).await?,
            Hook::AfterDelete => callback.after_delete(model).await?,
            Hook::BeforeValidation => callback.before_validation(model).await?,
            Hook::AfterValidation => callback.after_validation(model).await?,
            Hook::AfterLoad => callback.after_load(model).await?,
        }
    }
    Ok(())
}
