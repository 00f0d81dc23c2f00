use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use shop_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        Products, Users,
        products::{ActiveModel as ProductActive, Column as ProdCol},
        timestamp_now,
        users::ActiveModel as UserActive,
    },
    middleware::auth::{ADMIN_ROLE, USER_ROLE},
    services::{auth_service::hash_password, catalog_service::save_product, identity_service},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", "Shop Admin", "admin1234", ADMIN_ROLE).await?;
    let user_id = ensure_user(&orm, "user@example.com", "Shop User", "user1234", USER_ROLE).await?;
    seed_products(&orm).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    orm: &DatabaseConnection,
    email: &str,
    name: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    if let Ok(existing) = identity_service::get_user_by_email(orm, email).await {
        println!("User {email} already present");
        return Ok(existing.id);
    }

    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        name: Set(name.to_string()),
        password_hash: Set(password_hash),
        role: Set(role.to_string()),
        created_at: Set(timestamp_now()),
    };
    let id = Users::insert(user).exec(orm).await?.last_insert_id;

    println!("Ensured user {email} (role={role})");
    Ok(id)
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let products = [
        ("Axum Hoodie", "Warm hoodie for Rustaceans", 5_500, 50),
        ("Ferris Mug", "Coffee tastes better with Ferris", 1_200, 100),
        ("Rust Sticker Pack", "Decorate your laptop", 500, 200),
        ("E-book: Async Rust", "Learn async Rust patterns", 2_500, 75),
    ];

    for (name, desc, price, stock) in products {
        let exists = Products::find()
            .filter(ProdCol::Name.eq(name))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        save_product(
            orm,
            ProductActive {
                id: Set(Uuid::new_v4()),
                name: Set(name.to_string()),
                description: Set(Some(desc.to_string())),
                price: Set(price),
                stock: Set(stock),
                active: Set(true),
                created_at: Set(timestamp_now()),
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    println!("Seeded products");
    Ok(())
}
