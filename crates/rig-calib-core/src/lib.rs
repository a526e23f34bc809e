//! Dataset model and geometry primitives for multi-sensor extrinsic calibration.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec3`, `Iso3`, ...) and rotation conversions,
//! - the JSON dataset model (sensors, collections, labels, transforms),
//! - frame-tree lookups inside a collection,
//! - pinhole camera and calibration pattern geometry,
//! - declarative collection/sensor selection,
//! - deterministic synthetic rigs for tests.

pub mod camera;
pub mod dataset;
pub mod error;
/// Frame-tree chains and lookups.
pub mod frames;
/// Linear algebra type aliases and helpers.
pub mod math;
pub mod pattern;
pub mod selection;
/// Synthetic rigs with exact ground truth.
pub mod synthetic;
pub mod transform;

pub use camera::*;
pub use dataset::*;
pub use error::*;
pub use frames::ChainLink;
pub use math::*;
pub use pattern::*;
pub use selection::*;
pub use transform::*;
