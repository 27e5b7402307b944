// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Facts are short-lived, typed assertions about peers. This crate holds
//! their model and wire codec, the per-peer signer and the accumulator
//! that packs facts into signed groups.

pub mod accumulator;
pub mod attribute;
pub mod error;
pub mod fact;
pub mod key;
pub mod signer;
pub mod subject;
pub mod value;
pub mod varint;

pub use accumulator::{GroupAccumulator, MAX_GROUP_LEN, SIGNED_GROUP_OVERHEAD, UDP_MAX_SAFE_PAYLOAD};
pub use attribute::Attribute;
pub use error::{FactError, Result, SignerError};
pub use fact::{merge_list, Fact, MAX_TTL};
pub use key::FactKey;
pub use signer::Signer;
pub use subject::Subject;
pub use value::{SignedGroupValue, Value, NONCE_LEN, TAG_LEN};
