use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entity::{
    CartItems, Carts, OrderItems, Orders, Products, Users, cart_items, order_items, orders,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Parents before children so foreign keys resolve.
        create_table(manager, Users).await?;
        create_table(manager, Products).await?;
        create_table(manager, Carts).await?;
        create_table(manager, CartItems).await?;
        create_table(manager, Orders).await?;
        create_table(manager, OrderItems).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_cart_items_cart_product")
                    .table(CartItems)
                    .col(cart_items::Column::CartId)
                    .col(cart_items::Column::ProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_user_created")
                    .table(Orders)
                    .col(orders::Column::UserId)
                    .col(orders::Column::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_order_items_order")
                    .table(OrderItems)
                    .col(order_items::Column::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderItems).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CartItems).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Carts).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users).if_exists().to_owned())
            .await
    }
}

async fn create_table<E: EntityTrait>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr> {
    let schema = Schema::new(manager.get_database_backend());
    manager
        .create_table(
            schema
                .create_table_from_entity(entity)
                .if_not_exists()
                .to_owned(),
        )
        .await
}
