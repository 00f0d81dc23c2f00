pub use sea_orm_migration::prelude::*;

mod m20261018_000001_create_shop_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20261018_000001_create_shop_tables::Migration)]
    }
}
