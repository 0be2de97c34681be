//! Frame-to-frame tracking of deformable linear objects (cables, ropes,
//! wires) in depth-camera point clouds.
//!
//! The tracked state is a chain of ordered 3D nodes per object. Each frame
//! is registered against the previous chain with a CPD-style expectation
//! maximization solve regularized by locally linear embedding, guided by
//! correspondence priors traced along the visible part of every chain and
//! by a projection-based visibility classification.

pub mod chain;
pub mod config;
pub mod error;
pub mod geometry;
pub mod lle;
pub mod overlay;
pub mod postproc;
pub mod registration;
pub mod tracker;
pub mod traversal;
pub mod visibility;

pub use config::{TrackerConfig, TraversalMode};
pub use error::Error;
pub use geometry::CameraModel;
pub use overlay::OverlayImage;
pub use registration::{cpd_lle, RegistrationParams};
pub use tracker::{DloTracker, FrameOutput, OcclusionTopology, TrackerState};
pub use traversal::{Alignment, CorrespondencePrior};
pub use visibility::NodeVisibility;
