//! Connection entity model
//!
//! SeaORM entity for the connections table, which stores workspace-scoped
//! WhatsApp instances managed through one of the external providers.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveModelBehavior;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Connection entity representing one managed WhatsApp instance
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning workspace; every operation is scoped to it
    pub workspace_id: Uuid,

    /// Human label, unique per workspace (case-insensitive)
    pub instance_name: String,

    /// Provider slug ("evolution" | "zapi"), fixed at creation
    pub provider: String,

    /// Provider-side handle (Z-API stores "instanceId:token" here)
    pub external_id: Option<String>,

    /// Canonical status: creating|qr|connecting|connected|disconnected|error
    pub status: String,

    /// Digits-only phone with country prefix, populated once paired
    pub phone_number: Option<String>,

    /// Transient pairing payload; non-null iff status == "qr"
    pub qr_code: Option<String>,

    /// At most one true per workspace
    pub is_default: bool,

    /// Opaque CRM routing default
    pub default_pipeline_id: Option<Uuid>,

    /// Opaque CRM routing default
    pub default_column_id: Option<Uuid>,

    /// Opaque queue routing default
    pub queue_id: Option<Uuid>,

    /// Toggle consumed by the CRM collaborator, opaque to this service
    pub auto_create_crm_card: bool,

    /// Free-form bag (display color etc.), opaque to the engine
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
