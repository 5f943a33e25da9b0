pub use sea_orm_migration::prelude::*;

mod m2026_07_10_090000_create_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2026_07_10_090000_create_connections::Migration)]
    }
}
