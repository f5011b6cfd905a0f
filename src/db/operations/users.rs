use sqlx::PgPool;
use uuid::Uuid;

use crate::db::StoreError;

pub const GUEST_DISPLAY_NAME: &str = "Guest User";
pub const GUEST_NATIVE_LANGUAGE: &str = "en";

pub async fn ensure_user(pool: &PgPool, user_id: Uuid) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO "users" ("id", "display_name", "native_language")
        VALUES ($1, $2, $3)
        ON CONFLICT ("id") DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(GUEST_DISPLAY_NAME)
    .bind(GUEST_NATIVE_LANGUAGE)
    .execute(pool)
    .await?;
    Ok(())
}
