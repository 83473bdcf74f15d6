// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::WardenError;
use crate::messages::*;

use anyhow::format_err;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "unit_tests/serialize_tests.rs"]
mod serialize_tests;

#[derive(Serialize, Deserialize, Debug)]
pub enum SerializedMessage {
    IdentityReq(Box<IdentityRequest>),
    IdentityResp(Box<IdentityResponse>),
    LockReq(Box<LockRequest>),
    LockResp(Box<LockResponse>),
    UnlockReq(Box<UnlockRequest>),
    UnlockResp(Box<UnlockResponse>),
    UnlockAll(Box<UnlockAllRequest>),
    StatsReq(Box<StatsRequest>),
    StatsResp(Box<StatsResponse>),
    Reset(Box<ResetRequest>),
    // Handoff side channel
    Offer(Box<LockOffer>),
    Accept(Box<OfferAccept>),
    Confirmed(Box<OfferConfirmed>),
    Error(Box<WardenError>),
}

// This helper structure is only here to avoid cloning while serializing
// commands. Here we must replicate the definition of SerializedMessage
// exactly so that the variant tags match.
#[allow(dead_code)]
#[derive(Serialize)]
enum ShallowSerializedMessage<'a> {
    IdentityReq(&'a IdentityRequest),
    IdentityResp(&'a IdentityResponse),
    LockReq(&'a LockRequest),
    LockResp(&'a LockResponse),
    UnlockReq(&'a UnlockRequest),
    UnlockResp(&'a UnlockResponse),
    UnlockAll(&'a UnlockAllRequest),
    StatsReq(&'a StatsRequest),
    StatsResp(&'a StatsResponse),
    Reset(&'a ResetRequest),
    Offer(&'a LockOffer),
    Accept(&'a OfferAccept),
    Confirmed(&'a OfferConfirmed),
    Error(&'a WardenError),
}

fn serialize_into<W>(writer: &mut W, msg: &ShallowSerializedMessage<'_>) -> Result<(), anyhow::Error>
where
    W: std::io::Write,
{
    bcs::serialize_into(writer, msg).map_err(|err| format_err!("{err}"))
}

fn serialize(msg: &ShallowSerializedMessage<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    bcs::serialize_into(&mut buf, msg).expect("Serializing to a resizable buffer should not fail.");
    buf
}

pub fn serialize_identity_request(value: &IdentityRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::IdentityReq(value))
}

pub fn serialize_identity_response(value: &IdentityResponse) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::IdentityResp(value))
}

pub fn serialize_lock_request(value: &LockRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::LockReq(value))
}

pub fn serialize_lock_request_into<W>(writer: &mut W, value: &LockRequest) -> Result<(), anyhow::Error>
where
    W: std::io::Write,
{
    serialize_into(writer, &ShallowSerializedMessage::LockReq(value))
}

pub fn serialize_lock_response(value: &LockResponse) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::LockResp(value))
}

pub fn serialize_unlock_request(value: &UnlockRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::UnlockReq(value))
}

pub fn serialize_unlock_response(value: &UnlockResponse) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::UnlockResp(value))
}

pub fn serialize_unlock_all_request(value: &UnlockAllRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::UnlockAll(value))
}

pub fn serialize_stats_request(value: &StatsRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::StatsReq(value))
}

pub fn serialize_stats_response(value: &StatsResponse) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::StatsResp(value))
}

pub fn serialize_reset_request(value: &ResetRequest) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::Reset(value))
}

pub fn serialize_offer(value: &LockOffer) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::Offer(value))
}

pub fn serialize_accept(value: &OfferAccept) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::Accept(value))
}

pub fn serialize_confirmed(value: &OfferConfirmed) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::Confirmed(value))
}

pub fn serialize_error(value: &WardenError) -> Vec<u8> {
    serialize(&ShallowSerializedMessage::Error(value))
}

pub fn deserialize_message(data: &[u8]) -> Result<SerializedMessage, anyhow::Error> {
    bcs::from_bytes(data).map_err(|err| format_err!("{err}"))
}
