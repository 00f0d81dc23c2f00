use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::{
        Users,
        users::{Column as UserCol, Model as UserModel},
    },
    error::{AppError, AppResult},
};

pub async fn get_user_by_email<C: ConnectionTrait>(conn: &C, email: &str) -> AppResult<UserModel> {
    Users::find()
        .filter(UserCol::Email.eq(email.trim().to_lowercase()))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

/// Resolves the acting principal to its durable account.
pub async fn require_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<UserModel> {
    Users::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}
