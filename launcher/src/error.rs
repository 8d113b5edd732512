// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use diesel::result::DatabaseErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherError {
    // A request field failed validation (bad address, bad decimal, ...)
    InvalidArgument(String),
    // A live launch log already exists for the requested (item_type, item_id)
    AlreadyExists(String),
    // Lookup matched no launch log
    NotFound(String),
    // The store rejected or lost an operation; the transaction rolled back
    StorageError(String),
    // Ethereum node error worth retrying (connection refused, timeout, ...)
    TransientProviderError(String),
    // Ethereum node error
    ProviderError(String),
    // The node rejected a broadcast in a way no retry can fix
    PermanentTxError(String),
    // No signing key is configured for the requested `from` address
    NoSignerForAddress(String),
    // Internal launcher error
    InternalError(String),
    // Uncategorized error
    Generic(String),
}

impl LauncherError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            LauncherError::InvalidArgument(_) => "invalid_argument",
            LauncherError::AlreadyExists(_) => "already_exists",
            LauncherError::NotFound(_) => "not_found",
            LauncherError::StorageError(_) => "storage_error",
            LauncherError::TransientProviderError(_) => "transient_provider_error",
            LauncherError::ProviderError(_) => "provider_error",
            LauncherError::PermanentTxError(_) => "permanent_tx_error",
            LauncherError::NoSignerForAddress(_) => "no_signer_for_address",
            LauncherError::InternalError(_) => "internal_error",
            LauncherError::Generic(_) => "generic",
        }
    }
}

impl std::fmt::Display for LauncherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            LauncherError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            LauncherError::NotFound(msg) => write!(f, "not found: {msg}"),
            LauncherError::StorageError(msg) => write!(f, "storage error: {msg}"),
            LauncherError::TransientProviderError(msg) => {
                write!(f, "transient provider error: {msg}")
            }
            LauncherError::ProviderError(msg) => write!(f, "provider error: {msg}"),
            LauncherError::PermanentTxError(msg) => write!(f, "permanent tx error: {msg}"),
            LauncherError::NoSignerForAddress(addr) => {
                write!(f, "no signer configured for address {addr}")
            }
            LauncherError::InternalError(msg) => write!(f, "internal error: {msg}"),
            LauncherError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LauncherError {}

impl From<diesel::result::Error> for LauncherError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                LauncherError::AlreadyExists(info.message().to_string())
            }
            _ => LauncherError::StorageError(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for LauncherError {
    fn from(err: anyhow::Error) -> Self {
        LauncherError::InternalError(format!("{err:#}"))
    }
}

pub type LauncherResult<T> = Result<T, LauncherError>;
