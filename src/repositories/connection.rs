//! Connection store
//!
//! The persistence contract the lifecycle engine needs, and its SeaORM
//! implementation. The engine only ever sees the trait; tests substitute an
//! in-memory store.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::connection::{self, Entity as Connection, Model};

/// Store contract for connection rows.
///
/// `set_default` must be atomic: clearing the previous default and setting
/// the new one happen in a single transaction so the at-most-one invariant
/// holds at every commit point.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// All connections in a workspace, stable ordering (oldest first).
    async fn list(&self, workspace_id: Uuid) -> Result<Vec<Model>>;

    async fn get(&self, id: Uuid) -> Result<Option<Model>>;

    /// Case-insensitive name lookup within a workspace.
    async fn find_by_name(&self, workspace_id: Uuid, instance_name: &str) -> Result<Option<Model>>;

    async fn count(&self, workspace_id: Uuid) -> Result<u64>;

    /// Insert or fully update a row; returns the persisted state.
    async fn upsert(&self, row: Model) -> Result<Model>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Atomically make `id` the only default in its workspace.
    async fn set_default(&self, workspace_id: Uuid, id: Uuid) -> Result<()>;
}

/// SeaORM-backed [`ConnectionStore`].
#[derive(Debug, Clone)]
pub struct SqlConnectionStore {
    db: Arc<DatabaseConnection>,
}

impl SqlConnectionStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn active_from(row: &Model) -> connection::ActiveModel {
        connection::ActiveModel {
            id: Set(row.id),
            workspace_id: Set(row.workspace_id),
            instance_name: Set(row.instance_name.clone()),
            provider: Set(row.provider.clone()),
            external_id: Set(row.external_id.clone()),
            status: Set(row.status.clone()),
            phone_number: Set(row.phone_number.clone()),
            qr_code: Set(row.qr_code.clone()),
            is_default: Set(row.is_default),
            default_pipeline_id: Set(row.default_pipeline_id),
            default_column_id: Set(row.default_column_id),
            queue_id: Set(row.queue_id),
            auto_create_crm_card: Set(row.auto_create_crm_card),
            metadata: Set(row.metadata.clone()),
            created_at: Set(row.created_at),
            updated_at: Set(Utc::now().into()),
        }
    }
}

#[async_trait]
impl ConnectionStore for SqlConnectionStore {
    async fn list(&self, workspace_id: Uuid) -> Result<Vec<Model>> {
        let rows = Connection::find()
            .filter(connection::Column::WorkspaceId.eq(workspace_id))
            .order_by_asc(connection::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        let row = Connection::find_by_id(id).one(&*self.db).await?;
        Ok(row)
    }

    async fn find_by_name(&self, workspace_id: Uuid, instance_name: &str) -> Result<Option<Model>> {
        // The portable route: fetch workspace names and compare folded.
        // Workspaces hold a handful of connections, bounded by the limit
        // check, so this stays cheap.
        let rows = Connection::find()
            .filter(connection::Column::WorkspaceId.eq(workspace_id))
            .all(&*self.db)
            .await?;
        let needle = instance_name.to_lowercase();
        Ok(rows
            .into_iter()
            .find(|row| row.instance_name.to_lowercase() == needle))
    }

    async fn count(&self, workspace_id: Uuid) -> Result<u64> {
        use sea_orm::PaginatorTrait;
        let count = Connection::find()
            .filter(connection::Column::WorkspaceId.eq(workspace_id))
            .count(&*self.db)
            .await?;
        Ok(count)
    }

    async fn upsert(&self, row: Model) -> Result<Model> {
        let exists = Connection::find_by_id(row.id).one(&*self.db).await?;

        let active = Self::active_from(&row);
        if exists.is_some() {
            active.update(&*self.db).await?;
        } else {
            active.insert(&*self.db).await?;
        }

        let fetched = Connection::find_by_id(row.id).one(&*self.db).await?;
        fetched.ok_or_else(|| anyhow!("connection not persisted"))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        Connection::delete_by_id(id).exec(&*self.db).await?;
        Ok(())
    }

    async fn set_default(&self, workspace_id: Uuid, id: Uuid) -> Result<()> {
        let txn = self.db.begin().await?;

        // Clear-then-set inside one transaction; the invariant holds at
        // every commit point even with several prior defaults.
        Connection::update_many()
            .col_expr(connection::Column::IsDefault, Expr::value(false))
            .col_expr(
                connection::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(connection::Column::WorkspaceId.eq(workspace_id))
            .filter(connection::Column::IsDefault.eq(true))
            .exec(&txn)
            .await?;

        let target = Connection::find_by_id(id).one(&txn).await?;
        let Some(target) = target else {
            txn.rollback().await?;
            return Err(anyhow!(sea_orm::DbErr::RecordNotFound(format!(
                "connection {}",
                id
            ))));
        };
        if target.workspace_id != workspace_id {
            txn.rollback().await?;
            return Err(anyhow!(sea_orm::DbErr::RecordNotFound(format!(
                "connection {} in workspace {}",
                id, workspace_id
            ))));
        }

        let mut active: connection::ActiveModel = target.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now().into());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }
}
