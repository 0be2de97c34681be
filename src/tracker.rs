use nalgebra as na;

use crate::chain::{self, ChainLayout};
use crate::config::{TrackerConfig, TraversalMode};
use crate::error::Error;
use crate::geometry::CameraModel;
use crate::overlay::{self, OverlayImage};
use crate::postproc;
use crate::registration::{cpd_lle, kernel_matrix, RegistrationParams};
use crate::traversal::{self, Alignment, CorrespondencePrior};
use crate::visibility::{self, NodeVisibility, VisibilityParams};

const SIGMA2_INIT: f64 = 0.00001;
const BETA_POST_PROC: f64 = 0.1;

/// Lifecycle of the tracker: both the initial node chain and the camera
/// calibration must arrive before frames are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized,
    AwaitingCalibration,
    Tracking,
}

/// Per-object occlusion layout of the gap-filled visible index set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcclusionTopology {
    AllVisible,
    HeadOccluded,
    TailOccluded,
    MidOccluded,
    BothEndsOccluded,
}

impl OcclusionTopology {
    /// `visible` holds object-local indices, strictly increasing. `None`
    /// means the object is fully occluded.
    pub fn classify(visible: &[usize], nodes_per_dlo: usize) -> Option<Self> {
        let (&first, &last) = (visible.first()?, visible.last()?);

        if visible.len() == nodes_per_dlo {
            return Some(Self::AllVisible);
        }
        Some(match (first == 0, last == nodes_per_dlo - 1) {
            (true, true) => Self::MidOccluded,
            (true, false) => Self::TailOccluded,
            (false, true) => Self::HeadOccluded,
            (false, false) => Self::BothEndsOccluded,
        })
    }
}

/// Everything a frame produces for downstream consumers.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Updated node chain, one row per node.
    pub nodes: na::DMatrix<f64>,
    pub visibility: NodeVisibility,
    /// Correspondence priors used by this frame's solve, global indices.
    pub priors: Vec<CorrespondencePrior>,
    pub overlay: OverlayImage,
}

/// Frame-by-frame tracker for one or more deformable linear objects.
///
/// Owns the node chain and the mixture variance; both are updated in place
/// once per [`DloTracker::step`]. Frames arriving before initialization are
/// passed through untouched (`Ok(None)`).
pub struct DloTracker {
    config: TrackerConfig,
    state: TrackerState,
    layout: ChainLayout,

    init_nodes: Option<na::DMatrix<f64>>,
    camera: Option<CameraModel>,

    y: na::DMatrix<f64>,
    sigma2: f64,
    geodesic_coord: Vec<f64>,
    guide_nodes: na::DMatrix<f64>,
    correspondence_priors: Vec<CorrespondencePrior>,
}

impl DloTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;
        let nodes_per_dlo = config.nodes_per_dlo;

        Ok(Self {
            config,
            state: TrackerState::Uninitialized,
            layout: ChainLayout::new(0, nodes_per_dlo),
            init_nodes: None,
            camera: None,
            y: na::DMatrix::zeros(0, 3),
            sigma2: 0.0,
            geodesic_coord: Vec::new(),
            guide_nodes: na::DMatrix::zeros(0, 3),
            correspondence_priors: Vec::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    #[inline]
    pub fn nodes(&self) -> &na::DMatrix<f64> {
        &self.y
    }

    #[inline]
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    #[inline]
    pub fn guide_nodes(&self) -> &na::DMatrix<f64> {
        &self.guide_nodes
    }

    #[inline]
    pub fn correspondence_priors(&self) -> &[CorrespondencePrior] {
        &self.correspondence_priors
    }

    /// Seeds the tracker with the initial node chain. Object boundaries are
    /// inferred from `nodes_per_dlo`, not from the data.
    pub fn observe_init_nodes(&mut self, nodes: na::DMatrix<f64>) -> Result<(), Error> {
        if nodes.ncols() != 3 {
            return Err(Error::DimensionMismatch {
                expected: 3,
                got: nodes.ncols(),
            });
        }
        if nodes.nrows() == 0 || nodes.nrows() % self.config.nodes_per_dlo != 0 {
            return Err(Error::InvalidConfig(format!(
                "initial chain of {} nodes is not a multiple of nodes_per_dlo = {}",
                nodes.nrows(),
                self.config.nodes_per_dlo
            )));
        }

        self.init_nodes = Some(nodes);
        self.advance();
        Ok(())
    }

    /// Supplies the camera projection matrix.
    pub fn observe_camera(&mut self, camera: CameraModel) {
        self.camera = Some(camera);
        self.advance();
    }

    fn advance(&mut self) {
        if self.state == TrackerState::Tracking {
            return;
        }

        match (&self.init_nodes, &self.camera) {
            (Some(init), Some(_)) => {
                self.layout = ChainLayout::new(init.nrows(), self.config.nodes_per_dlo);
                self.geodesic_coord = chain::geodesic_coords(init, self.layout);
                self.y = init.clone();
                self.guide_nodes = init.clone();
                self.sigma2 = SIGMA2_INIT;
                self.state = TrackerState::Tracking;
                log::info!(
                    "tracking {} objects of {} nodes each",
                    self.layout.num_dlos,
                    self.layout.nodes_per_dlo
                );
            }
            (Some(_), None) => self.state = TrackerState::AwaitingCalibration,
            _ => {}
        }
    }

    fn pre_registration_params(&self) -> RegistrationParams {
        RegistrationParams {
            beta: self.config.beta_pre_proc,
            lambda: self.config.lambda_pre_proc,
            lle_weight: self.config.lle_weight,
            mu: self.config.mu,
            max_iter: self.config.max_iter,
            tol: self.config.tol,
            include_lle: true,
            use_geodesic: self.config.use_geodesic,
            alpha: 0.0,
            k_vis: 0.0,
            visibility_threshold: self.config.visibility_threshold,
            clamp: false,
        }
    }

    fn registration_params(&self) -> RegistrationParams {
        RegistrationParams {
            beta: self.config.beta,
            lambda: self.config.lambda,
            lle_weight: self.config.lle_weight,
            mu: self.config.mu,
            max_iter: self.config.max_iter,
            tol: self.config.tol,
            include_lle: self.config.include_lle,
            use_geodesic: self.config.use_geodesic,
            alpha: self.config.alpha,
            k_vis: self.config.k_vis,
            visibility_threshold: self.config.visibility_threshold,
            clamp: self.config.clamp,
        }
    }

    /// Processes one frame's point cloud. Returns `Ok(None)` until the
    /// tracker is initialized or when the frame carries no usable points.
    pub fn step(
        &mut self,
        x: &na::DMatrix<f64>,
        img_rows: usize,
        img_cols: usize,
    ) -> Result<Option<FrameOutput>, Error> {
        if self.state != TrackerState::Tracking {
            return Ok(None);
        }
        if x.ncols() != 3 {
            return Err(Error::DimensionMismatch {
                expected: 3,
                got: x.ncols(),
            });
        }
        if x.nrows() == 0 {
            log::warn!("empty point cloud, frame skipped");
            return Ok(None);
        }
        let camera = self.camera.as_ref().ok_or(Error::NotInitialized)?;

        // classify on the previous chain against the new cloud
        let vis_params = VisibilityParams {
            visibility_threshold: self.config.visibility_threshold,
            dlo_pixel_width: self.config.dlo_pixel_width,
            d_vis: self.config.d_vis,
        };
        let visibility = visibility::classify(
            &self.y,
            x,
            camera,
            img_rows,
            img_cols,
            self.layout,
            &self.geodesic_coord,
            &vis_params,
        );

        // cheap pre-registration brings the guide nodes up to date before
        // the priors are traced out
        let mut guide_nodes = if visibility.extended.len() == self.y.nrows() {
            self.y.clone()
        } else {
            chain::select_rows(&self.y, &visibility.extended)
        };
        let mut priors = Vec::new();
        if visibility.extended.is_empty() {
            log::warn!("no visible nodes, registering without priors");
        } else {
            let mut pre_sigma2 = self.sigma2;
            cpd_lle(
                x,
                &mut guide_nodes,
                &mut pre_sigma2,
                self.config.nodes_per_dlo,
                &self.pre_registration_params(),
                &[],
                &[],
            )?;

            priors = self.build_priors(&guide_nodes, &visibility.extended);
        }

        // full solve with priors and visibility weighting
        let mut sigma2 = if self.config.use_prev_sigma2 {
            self.sigma2
        } else {
            0.0
        };
        let mut y_new = self.y.clone();
        cpd_lle(
            x,
            &mut y_new,
            &mut sigma2,
            self.config.nodes_per_dlo,
            &self.registration_params(),
            &priors,
            &visibility.extended,
        )?;

        if self.config.post_processing {
            // with several objects the geodesic kernel must not couple them
            let post_layout = if self.config.use_geodesic {
                self.layout
            } else {
                ChainLayout::new(self.y.nrows(), self.y.nrows())
            };
            let g_post = kernel_matrix(&self.y, BETA_POST_PROC, post_layout);
            let init = self.init_nodes.as_ref().ok_or(Error::NotInitialized)?;
            y_new = postproc::smooth(&self.y, &y_new, &self.layout.edges(), init, &g_post);
        }

        self.y = y_new;
        self.sigma2 = sigma2;
        self.guide_nodes = guide_nodes;
        self.correspondence_priors = priors.clone();

        let overlay = overlay::render(&self.y, camera, img_rows, img_cols, self.layout);

        Ok(Some(FrameOutput {
            nodes: self.y.clone(),
            visibility,
            priors,
            overlay,
        }))
    }

    /// Densifies the pre-registered guide nodes into per-node priors, object
    /// by object, with the traversal passes matching each object's occlusion
    /// topology.
    fn build_priors(
        &self,
        guide_nodes: &na::DMatrix<f64>,
        extended: &[usize],
    ) -> Vec<CorrespondencePrior> {
        let npd = self.layout.nodes_per_dlo;
        let groups = self.layout.partition_indices(extended);

        let mut priors = Vec::with_capacity(self.y.nrows());
        let mut row_start = 0;
        for (dlo, group) in groups.iter().enumerate() {
            let guide_sub = guide_nodes.rows(row_start, group.len()).into_owned();
            row_start += group.len();

            let topology = match OcclusionTopology::classify(group, npd) {
                Some(t) => t,
                None => {
                    log::warn!("object {}: fully occluded, no correspondence priors", dlo);
                    continue;
                }
            };
            log::debug!("object {}: {:?}", dlo, topology);

            let geo_sub = &self.geodesic_coord[self.layout.block_range(dlo)];
            let offset = dlo * npd;

            let object_priors = match topology {
                OcclusionTopology::AllVisible | OcclusionTopology::MidOccluded => {
                    let head = self.traverse(geo_sub, &guide_sub, group, Alignment::Head);
                    let tail = self.traverse(geo_sub, &guide_sub, group, Alignment::Tail);
                    traversal::average_passes(&head, &tail, npd)
                }
                OcclusionTopology::TailOccluded => {
                    self.traverse(geo_sub, &guide_sub, group, Alignment::Head)
                }
                OcclusionTopology::HeadOccluded => {
                    self.traverse(geo_sub, &guide_sub, group, Alignment::Tail)
                }
                OcclusionTopology::BothEndsOccluded => {
                    // seed at the visible node that moved the least
                    let mut seed = 0;
                    let mut moved = f64::MAX;
                    for (row, &local) in group.iter().enumerate() {
                        let dist = (self.y.row(offset + local) - guide_sub.row(row)).norm();
                        if dist < moved {
                            moved = dist;
                            seed = row;
                        }
                    }
                    traversal::traverse_euclidean(
                        geo_sub,
                        &guide_sub,
                        group,
                        Alignment::Bidirectional { seed },
                    )
                }
            };

            priors.extend(object_priors.into_iter().map(|p| p.offset(offset)));
        }

        priors
    }

    fn traverse(
        &self,
        geo: &[f64],
        guide: &na::DMatrix<f64>,
        visible: &[usize],
        alignment: Alignment,
    ) -> Vec<CorrespondencePrior> {
        match self.config.traversal {
            TraversalMode::Geodesic => traversal::traverse_geodesic(geo, guide, visible, alignment),
            TraversalMode::Euclidean => {
                traversal::traverse_euclidean(geo, guide, visible, alignment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraModel {
        CameraModel::from_row_slice(&[
            500.0, 0.0, 320.0, 0.0, //
            0.0, 500.0, 240.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ])
    }

    #[test]
    fn topology_covers_the_closed_set() {
        use OcclusionTopology::*;

        assert_eq!(OcclusionTopology::classify(&[], 10), None);
        assert_eq!(
            OcclusionTopology::classify(&(0..10).collect::<Vec<_>>(), 10),
            Some(AllVisible)
        );
        assert_eq!(
            OcclusionTopology::classify(&[0, 1, 2, 8, 9], 10),
            Some(MidOccluded)
        );
        assert_eq!(
            OcclusionTopology::classify(&[0, 1, 2, 3], 10),
            Some(TailOccluded)
        );
        assert_eq!(
            OcclusionTopology::classify(&[6, 7, 8, 9], 10),
            Some(HeadOccluded)
        );
        assert_eq!(
            OcclusionTopology::classify(&[3, 4, 5], 10),
            Some(BothEndsOccluded)
        );
    }

    #[test]
    fn state_machine_requires_both_inputs() {
        let mut tracker = DloTracker::new(TrackerConfig::default()).unwrap();
        assert_eq!(tracker.state(), TrackerState::Uninitialized);

        let nodes =
            na::DMatrix::from_fn(20, 3, |i, j| if j == 0 { i as f64 * 0.05 } else { 1.0 });
        tracker.observe_init_nodes(nodes).unwrap();
        assert_eq!(tracker.state(), TrackerState::AwaitingCalibration);

        tracker.observe_camera(camera());
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert_eq!(tracker.nodes().nrows(), 20);
        assert!(tracker.sigma2() > 0.0);
    }

    #[test]
    fn frames_pass_through_until_initialized() {
        let mut tracker = DloTracker::new(TrackerConfig::default()).unwrap();
        let x = na::DMatrix::zeros(5, 3);
        assert!(tracker.step(&x, 480, 640).unwrap().is_none());
    }

    #[test]
    fn rejects_misshapen_initial_chain() {
        let mut tracker = DloTracker::new(TrackerConfig::default()).unwrap();
        assert!(tracker.observe_init_nodes(na::DMatrix::zeros(7, 3)).is_err());
        assert!(tracker
            .observe_init_nodes(na::DMatrix::zeros(20, 2))
            .is_err());
    }

    #[test]
    fn empty_cloud_is_skipped_once_tracking() {
        let mut tracker = DloTracker::new(TrackerConfig::default()).unwrap();
        let nodes =
            na::DMatrix::from_fn(20, 3, |i, j| if j == 0 { i as f64 * 0.05 } else { 1.0 });
        tracker.observe_init_nodes(nodes).unwrap();
        tracker.observe_camera(camera());

        let x = na::DMatrix::zeros(0, 3);
        assert!(tracker.step(&x, 480, 640).unwrap().is_none());
        assert_eq!(tracker.state(), TrackerState::Tracking);
    }
}
