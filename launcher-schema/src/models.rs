// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row models for the launcher tables.
//!
//! A `LaunchLog` is one *attempt* to put a logical intent on chain. A
//! logical intent is identified by `(item_type, item_id)` and may span
//! several rows: superseded `RETRIED` attempts plus at most one live row.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Lifecycle state of a launch log.
///
/// `CREATED -> PENDING -> (SUCCESS | FAILED)` is the happy path; a stuck
/// `PENDING` row is superseded by moving it to `RETRIED` and inserting a
/// replacement `PENDING` row with the same nonce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaunchLogStatus {
    Created,
    Pending,
    Retried,
    Success,
    Failed,
}

impl LaunchLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchLogStatus::Created => "CREATED",
            LaunchLogStatus::Pending => "PENDING",
            LaunchLogStatus::Retried => "RETRIED",
            LaunchLogStatus::Success => "SUCCESS",
            LaunchLogStatus::Failed => "FAILED",
        }
    }

    /// No further state change is allowed on a row in these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LaunchLogStatus::Retried | LaunchLogStatus::Success | LaunchLogStatus::Failed
        )
    }
}

impl fmt::Display for LaunchLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(LaunchLogStatus::Created),
            "PENDING" => Ok(LaunchLogStatus::Pending),
            "RETRIED" => Ok(LaunchLogStatus::Retried),
            "SUCCESS" => Ok(LaunchLogStatus::Success),
            "FAILED" => Ok(LaunchLogStatus::Failed),
            other => Err(format!("unknown launch log status: {other}")),
        }
    }
}

impl ToSql<Text, Pg> for LaunchLogStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for LaunchLogStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = std::str::from_utf8(bytes.as_bytes())?;
        s.parse::<LaunchLogStatus>().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::launch_logs)]
#[diesel(check_for_backend(Pg))]
pub struct LaunchLog {
    pub id: i64,
    pub item_type: String,
    pub item_id: String,
    pub status: LaunchLogStatus,
    pub from_address: String,
    pub to_address: String,
    pub value: BigDecimal,
    pub gas_price: BigDecimal,
    pub gas_limit: i64,
    pub nonce: Option<i64>,
    pub hash: Option<String>,
    pub data: Vec<u8>,
    pub is_urgent: bool,
    pub err_msg: String,
    pub gas_used: i64,
    pub executed_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LaunchLog {
    /// Hub key for the logical intent this row belongs to.
    pub fn intent_key(&self) -> String {
        intent_key(&self.item_type, &self.item_id)
    }
}

/// Key format shared by the subscribe hub and both loops.
pub fn intent_key(item_type: &str, item_id: &str) -> String {
    format!("Type:{item_type}-ID:{item_id}")
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::launch_logs)]
pub struct NewLaunchLog {
    pub item_type: String,
    pub item_id: String,
    pub status: LaunchLogStatus,
    pub from_address: String,
    pub to_address: String,
    pub value: BigDecimal,
    pub gas_price: BigDecimal,
    pub gas_limit: i64,
    pub nonce: Option<i64>,
    pub hash: Option<String>,
    pub data: Vec<u8>,
    pub is_urgent: bool,
}

/// Single-row cursor over the highest block whose receipts have been
/// fully applied.
#[derive(Debug, Clone, Copy, Queryable, Selectable)]
#[diesel(table_name = crate::schema::block_numbers)]
#[diesel(check_for_backend(Pg))]
pub struct BlockCursorRow {
    pub id: i32,
    pub block_number: i64,
}
