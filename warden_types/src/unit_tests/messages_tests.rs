// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::base_types::dbg_key;

#[test]
fn test_wait_is_clamped() {
    let req = LockRequest::waiting(dbg_key("r1"), u64::MAX);
    assert_eq!(req.wait, Some(MAX_WAIT_MILLIS));

    let req = LockRequest::waiting(dbg_key("r1"), 1000);
    assert_eq!(req.wait, Some(1000));
}

#[test]
fn test_immediate_has_no_wait() {
    let req = LockRequest::immediate(dbg_key("r1"));
    assert_eq!(req.wait, None);
}
