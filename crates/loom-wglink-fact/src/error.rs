// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::attribute::Attribute;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactError {
	#[error("truncated fact header: {0} bytes")]
	TruncatedHeader(usize),

	#[error("truncated fact body: need {needed} bytes, have {available}")]
	TruncatedBody { needed: usize, available: usize },

	#[error("invalid subject length {0}")]
	InvalidSubjectLength(usize),

	#[error("unknown attribute byte 0x{0:02x}")]
	UnknownAttribute(u8),

	#[error("invalid subject for {attribute}: {reason}")]
	InvalidSubject {
		attribute: Attribute,
		reason: String,
	},

	#[error("invalid value for {attribute}: {reason}")]
	InvalidValue {
		attribute: Attribute,
		reason: String,
	},

	#[error("invalid variable-length integer")]
	InvalidVarint,

	#[error("signed group nested inside a signed group")]
	NestedSignedGroup,

	#[error("value of {0} bytes does not fit the wire encoding")]
	ValueTooLong(usize),

	#[error("fact of {size} bytes exceeds group limit of {max}")]
	FactTooLarge { size: usize, max: usize },

	#[error("signing failed: {0}")]
	Signer(#[from] SignerError),
}

#[derive(Debug, Error)]
pub enum SignerError {
	#[error("signature verification failed")]
	Verification,

	#[error("sealing failed")]
	Seal,
}

pub type Result<T> = std::result::Result<T, FactError>;
