//! Ewald summation of dipole-dipole energies, forces and torques for point
//! dipoles in a cubic periodic box.
//!
//! [`ewald::DipoleEwald`] is the entry point. It works on a
//! [`cells::CellList`] of owned and halo particles and reduces structure
//! factors through a [`comms::SumReduction`], so the same code serves a
//! single process and a group of cooperating ranks.

pub mod cells;
pub mod common;
pub mod comms;
pub mod domain;
pub mod ewald;
pub mod geometry;

pub use cells::{CellGrid, CellList, RegistryError, Subdomain};
pub use common::EwaldConfig;
pub use comms::{GroupMember, ReductionError, SingleProcess, SumReduction, ThreadGroup};
pub use domain::{DipoleParticle, EnergyReport, EwaldError, EwaldErrorCategory, EwaldResult};
pub use ewald::{DipoleEwald, EwaldContext, EwaldParameters};
pub use geometry::{PeriodicBox, Vec3};
