// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable store for launch logs and the watcher's block cursor.
//!
//! Pool-level methods live on [`LaunchLogStore`] / [`BlockCursorStore`].
//! The free functions take a connection and are meant for use inside a
//! repeatable-read transaction opened by the caller: every state-machine
//! transition re-reads its target row `FOR UPDATE` through
//! [`lock_log_by_id`] first, so concurrent mutators serialize on the row
//! lock and the loser observes the already-advanced state.

use crate::error::{LauncherError, LauncherResult};
use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use launcher_pg_db::{Connection, Db};
use launcher_schema::models::{BlockCursorRow, LaunchLog, LaunchLogStatus, NewLaunchLog};
use launcher_schema::schema::{block_numbers, launch_logs};

// The block cursor is a single well-known row.
const CURSOR_ROW_ID: i32 = 1;

#[derive(Clone)]
pub struct LaunchLogStore {
    db: Db,
}

impl LaunchLogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn connect(&self) -> LauncherResult<Connection<'_>> {
        self.db
            .connect()
            .await
            .map_err(|e| LauncherError::StorageError(format!("connection pool: {e:#}")))
    }

    /// Insert a fresh log. A live row for the same intent trips the
    /// partial unique index and comes back as `AlreadyExists`.
    pub async fn insert(&self, new_log: NewLaunchLog) -> LauncherResult<LaunchLog> {
        let mut conn = self.connect().await?;
        let log = diesel::insert_into(launch_logs::table)
            .values(&new_log)
            .returning(LaunchLog::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(log)
    }

    pub async fn get_by_id(&self, log_id: i64) -> LauncherResult<Option<LaunchLog>> {
        let mut conn = self.connect().await?;
        let log = launch_logs::table
            .find(log_id)
            .select(LaunchLog::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(log)
    }

    pub async fn get_by_hash(&self, tx_hash: &str) -> LauncherResult<Option<LaunchLog>> {
        let mut conn = self.connect().await?;
        let log = launch_logs::table
            .filter(launch_logs::hash.eq(tx_hash))
            .select(LaunchLog::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(log)
    }

    /// All rows for an intent, RETRIED ancestors included, oldest first.
    pub async fn get_by_intent(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> LauncherResult<Vec<LaunchLog>> {
        let mut conn = self.connect().await?;
        let logs = launch_logs::table
            .filter(launch_logs::item_type.eq(item_type))
            .filter(launch_logs::item_id.eq(item_id))
            .order(launch_logs::id.asc())
            .select(LaunchLog::as_select())
            .load(&mut conn)
            .await?;
        Ok(logs)
    }

    pub async fn count_by_intent(&self, item_type: &str, item_id: &str) -> LauncherResult<i64> {
        let mut conn = self.connect().await?;
        let count = launch_logs::table
            .filter(launch_logs::item_type.eq(item_type))
            .filter(launch_logs::item_id.eq(item_id))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    /// Logs the send loop should look at: everything still CREATED plus
    /// PENDING rows that have sat unchanged past the stale threshold.
    pub async fn find_dispatchable(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> LauncherResult<Vec<LaunchLog>> {
        use diesel::BoolExpressionMethods;

        let mut conn = self.connect().await?;
        let logs = launch_logs::table
            .filter(
                launch_logs::status.eq(LaunchLogStatus::Created).or(launch_logs::status
                    .eq(LaunchLogStatus::Pending)
                    .and(launch_logs::updated_at.lt(stale_before))),
            )
            .order(launch_logs::id.asc())
            .limit(limit)
            .select(LaunchLog::as_select())
            .load(&mut conn)
            .await?;
        Ok(logs)
    }
}

// ----------------------------------------------------------------------
// In-transaction helpers
// ----------------------------------------------------------------------

/// Re-read a log under `SELECT ... FOR UPDATE`. Blocks until any
/// concurrent transaction holding the row lock commits or rolls back.
pub async fn lock_log_by_id(
    conn: &mut AsyncPgConnection,
    log_id: i64,
) -> QueryResult<Option<LaunchLog>> {
    launch_logs::table
        .find(log_id)
        .for_update()
        .select(LaunchLog::as_select())
        .first(conn)
        .await
        .optional()
}

/// Highest nonce ever assigned to a `from` address in the store.
pub async fn max_nonce_for_address(
    conn: &mut AsyncPgConnection,
    from_address: &str,
) -> QueryResult<Option<i64>> {
    launch_logs::table
        .filter(launch_logs::from_address.eq(from_address))
        .select(max(launch_logs::nonce))
        .first(conn)
        .await
}

pub async fn insert_log(
    conn: &mut AsyncPgConnection,
    new_log: &NewLaunchLog,
) -> QueryResult<LaunchLog> {
    diesel::insert_into(launch_logs::table)
        .values(new_log)
        .returning(LaunchLog::as_returning())
        .get_result(conn)
        .await
}

/// First broadcast happened: CREATED -> PENDING with nonce and hash.
pub async fn mark_pending(
    conn: &mut AsyncPgConnection,
    log_id: i64,
    nonce: i64,
    tx_hash: &str,
) -> QueryResult<LaunchLog> {
    diesel::update(launch_logs::table.find(log_id))
        .set((
            launch_logs::status.eq(LaunchLogStatus::Pending),
            launch_logs::nonce.eq(Some(nonce)),
            launch_logs::hash.eq(Some(tx_hash.to_string())),
            launch_logs::updated_at.eq(diesel::dsl::now),
        ))
        .returning(LaunchLog::as_returning())
        .get_result(conn)
        .await
}

/// Permanent broadcast failure: record the node's message and stop.
pub async fn mark_failed(
    conn: &mut AsyncPgConnection,
    log_id: i64,
    err_msg: &str,
) -> QueryResult<LaunchLog> {
    diesel::update(launch_logs::table.find(log_id))
        .set((
            launch_logs::status.eq(LaunchLogStatus::Failed),
            launch_logs::err_msg.eq(err_msg),
            launch_logs::updated_at.eq(diesel::dsl::now),
        ))
        .returning(LaunchLog::as_returning())
        .get_result(conn)
        .await
}

/// Receipt observed: PENDING -> SUCCESS or FAILED with execution details.
pub async fn mark_executed(
    conn: &mut AsyncPgConnection,
    log_id: i64,
    status: LaunchLogStatus,
    gas_used: i64,
    executed_at: i64,
    err_msg: &str,
) -> QueryResult<LaunchLog> {
    diesel::update(launch_logs::table.find(log_id))
        .set((
            launch_logs::status.eq(status),
            launch_logs::gas_used.eq(gas_used),
            launch_logs::executed_at.eq(executed_at),
            launch_logs::err_msg.eq(err_msg),
            launch_logs::updated_at.eq(diesel::dsl::now),
        ))
        .returning(LaunchLog::as_returning())
        .get_result(conn)
        .await
}

pub async fn mark_retried(conn: &mut AsyncPgConnection, log_id: i64) -> QueryResult<LaunchLog> {
    diesel::update(launch_logs::table.find(log_id))
        .set((
            launch_logs::status.eq(LaunchLogStatus::Retried),
            launch_logs::updated_at.eq(diesel::dsl::now),
        ))
        .returning(LaunchLog::as_returning())
        .get_result(conn)
        .await
}

/// Retire every other live PENDING row of the intent before inserting a
/// replacement, so the intent never carries two live rows.
pub async fn retire_other_pending(
    conn: &mut AsyncPgConnection,
    item_type: &str,
    item_id: &str,
    keep_hash: &str,
) -> QueryResult<usize> {
    diesel::update(
        launch_logs::table
            .filter(launch_logs::item_type.eq(item_type))
            .filter(launch_logs::item_id.eq(item_id))
            .filter(launch_logs::status.eq(LaunchLogStatus::Pending))
            .filter(launch_logs::hash.ne(keep_hash)),
    )
    .set((
        launch_logs::status.eq(LaunchLogStatus::Retried),
        launch_logs::updated_at.eq(diesel::dsl::now),
    ))
    .execute(conn)
    .await
}

// ----------------------------------------------------------------------
// Block cursor
// ----------------------------------------------------------------------

#[derive(Clone)]
pub struct BlockCursorStore {
    db: Db,
}

impl BlockCursorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn connect(&self) -> LauncherResult<Connection<'_>> {
        self.db
            .connect()
            .await
            .map_err(|e| LauncherError::StorageError(format!("connection pool: {e:#}")))
    }

    /// Seed the cursor row. Idempotent; call once at startup.
    pub async fn ensure_initialized(&self) -> LauncherResult<()> {
        let mut conn = self.connect().await?;
        diesel::insert_into(block_numbers::table)
            .values((
                block_numbers::id.eq(CURSOR_ROW_ID),
                block_numbers::block_number.eq(0i64),
            ))
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Highest block whose receipts have been fully applied.
    pub async fn get(&self) -> LauncherResult<i64> {
        let mut conn = self.connect().await?;
        let row: BlockCursorRow = block_numbers::table
            .find(CURSOR_ROW_ID)
            .select(BlockCursorRow::as_select())
            .first(&mut conn)
            .await?;
        Ok(row.block_number)
    }

    /// Monotonic set: writes only when `block_number` advances the cursor.
    /// Returns whether the row changed.
    pub async fn increase_to(&self, block_number: i64) -> LauncherResult<bool> {
        let mut conn = self.connect().await?;
        let updated = diesel::update(
            block_numbers::table
                .find(CURSOR_ROW_ID)
                .filter(block_numbers::block_number.lt(block_number)),
        )
        .set(block_numbers::block_number.eq(block_number))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }
}
