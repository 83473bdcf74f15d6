// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::base_types::{dbg_key, LockerId};
use crate::error::WardenError;
use crate::messages::*;

#[test]
fn test_request_roundtrip() {
    let req = LockRequest::waiting(dbg_key("r1"), 1000);
    let buf = serialize_lock_request(&req);
    match deserialize_message(&buf).unwrap() {
        SerializedMessage::LockReq(out) => assert_eq!(*out, req),
        _ => panic!("wrong variant"),
    }
}

#[test]
fn test_error_reply_roundtrip() {
    let err = WardenError::InvalidDecoding;
    let buf = serialize_error(&err);
    match deserialize_message(&buf).unwrap() {
        SerializedMessage::Error(out) => assert_eq!(*out, err),
        _ => panic!("wrong variant"),
    }
}

#[test]
fn test_shallow_and_boxed_encodings_agree() {
    // The shallow serializer must produce the same bytes as the boxed enum,
    // variant tag included.
    let resp = IdentityResponse {
        locker: LockerId::new(42),
    };
    let shallow = serialize_identity_response(&resp);
    let boxed = bcs::to_bytes(&SerializedMessage::IdentityResp(Box::new(resp))).unwrap();
    assert_eq!(shallow, boxed);
}

#[test]
fn test_garbage_is_rejected() {
    assert!(deserialize_message(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    assert!(deserialize_message(&[]).is_err());
}

#[test]
fn test_writer_path() {
    let mut buf = Vec::new();
    serialize_lock_request_into(&mut buf, &LockRequest::immediate(dbg_key("r1"))).unwrap();
    assert!(matches!(
        deserialize_message(&buf).unwrap(),
        SerializedMessage::LockReq(_)
    ));
}
