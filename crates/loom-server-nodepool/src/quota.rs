// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Multi-dimensional resource quota arithmetic.
//!
//! A [`QuotaInformation`] is used both as a limit (how much may be used) and
//! as a cost (how much something uses). Limits default unset dimensions to
//! `+∞` so they can be subtracted from like any other number.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A vector over the compute resources a provider accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuotaInformation {
	pub cores: f64,
	pub instances: f64,
	pub ram: f64,
}

impl QuotaInformation {
	/// Build a vector where every unset dimension takes `default`.
	pub fn new(cores: Option<f64>, instances: Option<f64>, ram: Option<f64>, default: f64) -> Self {
		Self {
			cores: cores.unwrap_or(default),
			instances: instances.unwrap_or(default),
			ram: ram.unwrap_or(default),
		}
	}

	/// The zero vector; the cost of something that uses nothing.
	pub fn zero() -> Self {
		Self::default()
	}

	/// Every dimension unbounded.
	pub fn unlimited() -> Self {
		Self::new(None, None, None, f64::INFINITY)
	}

	/// The cost of one instance with the given flavor.
	pub fn for_instance(cores: f64, ram: f64) -> Self {
		Self {
			cores,
			instances: 1.0,
			ram,
		}
	}

	pub fn add(&mut self, other: &QuotaInformation) {
		self.cores += other.cores;
		self.instances += other.instances;
		self.ram += other.ram;
	}

	pub fn subtract(&mut self, other: &QuotaInformation) {
		self.cores -= other.cores;
		self.instances -= other.instances;
		self.ram -= other.ram;
	}

	/// True iff every dimension is at least zero.
	pub fn non_negative(&self) -> bool {
		self.dimensions().iter().all(|(_, value)| *value >= 0.0)
	}

	pub fn is_unlimited(&self) -> bool {
		self.dimensions().iter().all(|(_, value)| value.is_infinite() && *value > 0.0)
	}

	fn dimensions(&self) -> [(&'static str, f64); 3] {
		[
			("cores", self.cores),
			("instances", self.instances),
			("ram", self.ram),
		]
	}
}

impl fmt::Display for QuotaInformation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let parts: Vec<String> = self
			.dimensions()
			.iter()
			.map(|(name, value)| {
				if value.is_infinite() && *value > 0.0 {
					format!("{name}=inf")
				} else {
					format!("{name}={value}")
				}
			})
			.collect();
		write!(f, "{{{}}}", parts.join(", "))
	}
}

impl AddAssign<&QuotaInformation> for QuotaInformation {
	fn add_assign(&mut self, rhs: &QuotaInformation) {
		QuotaInformation::add(self, rhs);
	}
}

impl SubAssign<&QuotaInformation> for QuotaInformation {
	fn sub_assign(&mut self, rhs: &QuotaInformation) {
		self.subtract(rhs);
	}
}

impl Add for QuotaInformation {
	type Output = QuotaInformation;

	fn add(mut self, rhs: QuotaInformation) -> QuotaInformation {
		self += &rhs;
		self
	}
}

impl Sub for QuotaInformation {
	type Output = QuotaInformation;

	fn sub(mut self, rhs: QuotaInformation) -> QuotaInformation {
		self -= &rhs;
		self
	}
}

impl std::iter::Sum for QuotaInformation {
	fn sum<I: Iterator<Item = QuotaInformation>>(iter: I) -> Self {
		iter.fold(QuotaInformation::zero(), |acc, q| acc + q)
	}
}

/// Provider-wide limits as reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
	Known(QuotaInformation),
	/// The adapter cannot describe its limits; treated as unlimited, never as zero.
	Unbounded,
}

impl Limit {
	pub fn resolve(self) -> QuotaInformation {
		match self {
			Limit::Known(quota) => quota,
			Limit::Unbounded => QuotaInformation::unlimited(),
		}
	}
}

/// The marginal cost of one node of a label as reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cost {
	Known(QuotaInformation),
	/// The adapter cannot price the label; it must not block admission.
	Unknown,
}

impl Cost {
	pub fn resolve(self) -> QuotaInformation {
		match self {
			Cost::Known(quota) => quota,
			Cost::Unknown => QuotaInformation::zero(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_fills_unset_dimensions_with_default() {
		let q = QuotaInformation::new(Some(4.0), None, None, f64::INFINITY);
		assert_eq!(q.cores, 4.0);
		assert!(q.instances.is_infinite());
		assert!(q.ram.is_infinite());
	}

	#[test]
	fn non_negative_fails_on_any_negative_dimension() {
		let mut q = QuotaInformation::new(Some(2.0), Some(1.0), Some(1024.0), 0.0);
		assert!(q.non_negative());

		q.subtract(&QuotaInformation::for_instance(1.0, 512.0));
		assert!(q.non_negative());
		assert_eq!(q.instances, 0.0);

		q.subtract(&QuotaInformation::for_instance(1.0, 512.0));
		assert!(!q.non_negative());
	}

	#[test]
	fn unlimited_stays_unlimited_after_subtracting_usage() {
		let mut q = QuotaInformation::unlimited();
		q.subtract(&QuotaInformation::for_instance(1_000.0, 1_000_000.0));
		assert!(q.non_negative());
		assert!(q.is_unlimited());
	}

	#[test]
	fn limit_unbounded_resolves_to_infinite() {
		assert!(Limit::Unbounded.resolve().is_unlimited());
		let known = QuotaInformation::new(Some(8.0), Some(2.0), Some(4096.0), 0.0);
		assert_eq!(Limit::Known(known).resolve(), known);
	}

	#[test]
	fn cost_unknown_resolves_to_zero() {
		assert_eq!(Cost::Unknown.resolve(), QuotaInformation::zero());
	}

	#[test]
	fn sum_adds_componentwise() {
		let total: QuotaInformation = vec![
			QuotaInformation::for_instance(2.0, 2048.0),
			QuotaInformation::for_instance(4.0, 8192.0),
		]
		.into_iter()
		.sum();
		assert_eq!(total, QuotaInformation::new(Some(6.0), Some(2.0), Some(10240.0), 0.0));
	}

	#[test]
	fn display_marks_unbounded_dimensions() {
		let q = QuotaInformation::new(Some(4.0), None, Some(0.0), f64::INFINITY);
		assert_eq!(q.to_string(), "{cores=4, instances=inf, ram=0}");
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	fn finite_quota() -> impl Strategy<Value = QuotaInformation> {
		(-1_000_000i64..1_000_000, -1_000i64..1_000, -1_000_000i64..1_000_000).prop_map(
			|(cores, instances, ram)| QuotaInformation {
				cores: cores as f64,
				instances: instances as f64,
				ram: ram as f64,
			},
		)
	}

	fn limit_quota() -> impl Strategy<Value = QuotaInformation> {
		(
			proptest::option::of(0i64..1_000_000),
			proptest::option::of(0i64..1_000),
			proptest::option::of(0i64..1_000_000),
		)
			.prop_map(|(cores, instances, ram)| {
				QuotaInformation::new(
					cores.map(|v| v as f64),
					instances.map(|v| v as f64),
					ram.map(|v| v as f64),
					f64::INFINITY,
				)
			})
	}

	proptest! {
		#[test]
		fn subtract_then_add_is_identity(q1 in limit_quota(), q2 in finite_quota()) {
			let mut result = q1;
			result.subtract(&q2);
			QuotaInformation::add(&mut result, &q2);
			prop_assert_eq!(result, q1);
		}

		#[test]
		fn unset_limits_never_go_negative(used in finite_quota()) {
			let mut limits = QuotaInformation::new(None, None, None, f64::INFINITY);
			limits.subtract(&used);
			prop_assert!(limits.non_negative());
		}

		#[test]
		fn subtracting_more_never_helps(base in limit_quota(), a in finite_quota(), extra in finite_quota()) {
			let extra = QuotaInformation {
				cores: extra.cores.abs(),
				instances: extra.instances.abs(),
				ram: extra.ram.abs(),
			};
			let fewer = base - a;
			let more = base - a - extra;
			prop_assert!(!more.non_negative() || fewer.non_negative());
		}
	}
}
