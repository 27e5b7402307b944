// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::TrustEvaluator;
use loom_wglink_common::TrustLevel;
use loom_wglink_fact::{Fact, Subject};
use std::fmt;
use std::net::IpAddr;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
	/// The first evaluator with an opinion decides.
	FirstOnly,
	/// Lowest level among evaluators with an opinion.
	LeastPermission,
	/// Highest level among evaluators with an opinion.
	MostPermission,
}

pub struct CompositeTrust {
	mode: CompositeMode,
	evaluators: Vec<Box<dyn TrustEvaluator>>,
}

impl CompositeTrust {
	pub fn new(mode: CompositeMode) -> Self {
		Self {
			mode,
			evaluators: Vec::new(),
		}
	}

	pub fn with(mut self, evaluator: impl TrustEvaluator + 'static) -> Self {
		self.evaluators.push(Box::new(evaluator));
		self
	}

	pub fn mode(&self) -> CompositeMode {
		self.mode
	}
}

impl fmt::Debug for CompositeTrust {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CompositeTrust")
			.field("mode", &self.mode)
			.field("evaluators", &self.evaluators.len())
			.finish()
	}
}

impl TrustEvaluator for CompositeTrust {
	fn is_known(&self, subject: &Subject) -> bool {
		self.evaluators.iter().any(|e| e.is_known(subject))
	}

	fn trust_level(&self, fact: &Fact, source: IpAddr) -> Option<TrustLevel> {
		let mut opinions = self
			.evaluators
			.iter()
			.filter_map(|e| e.trust_level(fact, source));
		let level = match self.mode {
			CompositeMode::FirstOnly => opinions.next(),
			CompositeMode::LeastPermission => opinions.min(),
			CompositeMode::MostPermission => opinions.max(),
		};
		trace!(%fact, %source, ?level, mode = ?self.mode, "evaluated trust");
		level
	}
}
