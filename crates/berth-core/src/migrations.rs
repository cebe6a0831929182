// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent schema application.
//!
//! The schema is embedded at compile time and applied with plain
//! `CREATE ... IF NOT EXISTS` statements, so calling [`run`] on every
//! boot is safe and keeps a fresh database and a long-lived one on the
//! same shape.

use sqlx::PgPool;

/// Apply the berth schema to the connected database.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(include_str!("../migrations/schema.sql"))
        .execute(pool)
        .await?;
    Ok(())
}
