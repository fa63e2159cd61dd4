use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::AppError;

pub type DbPool = SqlitePool;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool, AppError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Reads a nullable amount stored as decimal text.
pub fn decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|text| {
        Decimal::from_str(&text).map_err(|err| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(err),
        })
    })
    .transpose()
}

/// Text form an amount is stored in.
pub fn decimal_text(amount: Option<Decimal>) -> Option<String> {
    amount.map(|amount| amount.to_string())
}
