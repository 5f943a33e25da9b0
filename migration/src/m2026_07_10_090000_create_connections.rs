//! Migration to create the connections table.
//!
//! Stores workspace-scoped WhatsApp connection instances, one row per
//! remote provider instance, including pairing state and routing defaults.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::WorkspaceId).uuid().not_null())
                    .col(ColumnDef::new(Connections::InstanceName).text().not_null())
                    .col(ColumnDef::new(Connections::Provider).text().not_null())
                    .col(ColumnDef::new(Connections::ExternalId).text().null())
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("creating"),
                    )
                    .col(ColumnDef::new(Connections::PhoneNumber).text().null())
                    .col(ColumnDef::new(Connections::QrCode).text().null())
                    .col(
                        ColumnDef::new(Connections::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Connections::DefaultPipelineId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(Connections::DefaultColumnId).uuid().null())
                    .col(ColumnDef::new(Connections::QueueId).uuid().null())
                    .col(
                        ColumnDef::new(Connections::AutoCreateCrmCard)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Connections::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Case-insensitive uniqueness is enforced by the repository lookup;
        // this index backs the exact-name fast path and guards plain duplicates.
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_workspace_instance_name")
                    .table(Connections::Table)
                    .col(Connections::WorkspaceId)
                    .col(Connections::InstanceName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connections_workspace_id")
                    .table(Connections::Table)
                    .col(Connections::WorkspaceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connections_workspace_instance_name")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_connections_workspace_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    WorkspaceId,
    InstanceName,
    Provider,
    ExternalId,
    Status,
    PhoneNumber,
    QrCode,
    IsDefault,
    DefaultPipelineId,
    DefaultColumnId,
    QueueId,
    AutoCreateCrmCard,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
