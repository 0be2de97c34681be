use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Strategy used to densify guide nodes into correspondence priors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraversalMode {
    /// Lock-step arc-length walk along the guide-node polyline.
    Geodesic,
    /// Look-ahead line/sphere pursuit along the guide-node polyline.
    Euclidean,
}

/// Full configuration surface of the tracker.
///
/// Defaults mirror the reference parameterization; `validate` must pass
/// before the config is handed to [`crate::DloTracker::new`].
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    // registration hyperparameters
    pub beta: f64,
    pub lambda: f64,
    pub alpha: f64,
    pub lle_weight: f64,
    pub mu: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub beta_pre_proc: f64,
    pub lambda_pre_proc: f64,

    // structural parameters
    pub nodes_per_dlo: usize,
    pub dlo_diameter: f64,

    // visibility parameters
    pub visibility_threshold: f64,
    pub dlo_pixel_width: usize,
    pub d_vis: f64,
    pub k_vis: f64,

    // toggles
    pub include_lle: bool,
    pub use_geodesic: bool,
    pub use_prev_sigma2: bool,
    pub multi_color_dlo: bool,
    pub clamp: bool,

    pub traversal: TraversalMode,
    pub post_processing: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            beta: 5.0,
            lambda: 1.0,
            alpha: 0.0,
            lle_weight: 1.0,
            mu: 0.05,
            max_iter: 50,
            tol: 0.00001,
            beta_pre_proc: 3.0,
            lambda_pre_proc: 1.0,

            nodes_per_dlo: 20,
            dlo_diameter: 0.01,

            visibility_threshold: 0.02,
            dlo_pixel_width: 40,
            d_vis: 0.1,
            k_vis: 0.0,

            include_lle: false,
            use_geodesic: true,
            use_prev_sigma2: true,
            multi_color_dlo: false,
            clamp: false,

            traversal: TraversalMode::Euclidean,
            post_processing: true,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.beta > 0.0) {
            return Err(Error::InvalidConfig(format!("beta must be > 0, got {}", self.beta)));
        }
        if !(self.beta_pre_proc > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "beta_pre_proc must be > 0, got {}",
                self.beta_pre_proc
            )));
        }
        if self.lambda < 0.0 || self.lambda_pre_proc < 0.0 {
            return Err(Error::InvalidConfig("lambda must be >= 0".into()));
        }
        if self.alpha < 0.0 || self.lle_weight < 0.0 || self.k_vis < 0.0 {
            return Err(Error::InvalidConfig(
                "alpha, lle_weight and k_vis must be >= 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.mu) {
            return Err(Error::InvalidConfig(format!(
                "mu must be within [0, 1), got {}",
                self.mu
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidConfig("max_iter must be > 0".into()));
        }
        if !(self.tol > 0.0) {
            return Err(Error::InvalidConfig(format!("tol must be > 0, got {}", self.tol)));
        }
        if self.nodes_per_dlo < 4 {
            return Err(Error::InvalidConfig(format!(
                "nodes_per_dlo must be >= 4, got {}",
                self.nodes_per_dlo
            )));
        }
        if !(self.dlo_diameter > 0.0) {
            return Err(Error::InvalidConfig("dlo_diameter must be > 0".into()));
        }
        if self.visibility_threshold < 0.0 || self.d_vis < 0.0 {
            return Err(Error::InvalidConfig(
                "visibility_threshold and d_vis must be >= 0".into(),
            ));
        }
        if self.dlo_pixel_width == 0 {
            return Err(Error::InvalidConfig("dlo_pixel_width must be > 0".into()));
        }

        Ok(())
    }
}
