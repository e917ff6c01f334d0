//! # Event filtering engine
//!
//! This crate is the matching/decision core behind an event-interception
//! layer: for every intercepted operation it decides whether the
//! operation is allowed, denied or otherwise flagged, by evaluating the
//! filters registered for that operation kind against the operation's
//! runtime parameters.
//!
//! # General design
//!
//! - [`FilterSetIndex`] maps an [`OperationKey`] (interceptor,
//!   operation, minor code, pre/post point) to one [`FilterSet`],
//!   created lazily. It also owns the process-wide filter-id counter
//!   and the advisory active flag.
//! - A [`FilterSet`] holds a growable table of filter slots, two
//!   bitmaps (active slots, group presence) and a deduplicated list of
//!   parameter predicates. Filters declaring byte-identical conditions
//!   share one stored predicate, so each condition is checked once per
//!   operation.
//! - [`FilterSet::get_verdict`] excludes the filters whose predicates
//!   fail against the event, then lets one filter win per group (lowest
//!   slot position) and ORs the winners' verdict bits and wish masks
//!   together. Groups encode priority tiers; the OR merge lets
//!   independent policy dimensions (deny, audit, ...) compose.
//!
//! # Locking and lifetime
//!
//! The index and each filter set have their own reader/writer lock;
//! nothing blocks inside a critical section. Teardown uses a
//! reference-drain scheme: lookups take a [`FilterSetHandle`] backed by
//! an atomic reference, and destruction first refuses new references,
//! then waits for outstanding ones before the set goes away. An
//! in-flight [`FilterSet::get_verdict`] therefore never observes a
//! half-destroyed set.

pub(crate) mod bitmap;
mod error;
mod event;
mod filter_set;
mod index;
pub(crate) mod params;
pub(crate) mod rundown;
pub(crate) mod slots;

pub use bitmap::MAP_CAPACITY;
pub use error::FilterError;
pub use event::{EventData, ParameterId, ParamsMask, Verdict};
pub use filter_set::{FilterSet, FilterSpec};
pub use index::{FilterSetHandle, FilterSetIndex, InterceptorKind, OperationKey, OperationPoint};
pub use params::{Comparison, PredicateSpec, ValueSet};
