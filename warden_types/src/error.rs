// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[macro_export]
macro_rules! wd_bail {
    ($e:expr) => {
        return Err($e)
    };
}

#[macro_export(local_inner_macros)]
macro_rules! wd_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            wd_bail!($e);
        }
    };
}

/// Custom error type for the lock service.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize, Error, Hash)]
pub enum WardenError {
    // Wire protocol issues
    #[error("Message could not be decoded")]
    InvalidDecoding,
    #[error("Unexpected message received")]
    UnexpectedMessage,
    #[error("Client IO error: {error}")]
    ClientIoError { error: String },

    // Authority lifecycle
    #[error("The authority is no longer running")]
    AuthorityShutdown,
}

pub type WardenResult<T = ()> = Result<T, WardenError>;
