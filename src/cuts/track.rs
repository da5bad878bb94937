use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::cuts::generators;
use crate::cuts::registry::{CutRegistry, FIDUCIAL};
use crate::error::CutResult;
use crate::run::RunContext;
use crate::space::Space;

pub const NAMESPACE: &str = "track_cuts";

/// Track-level cuts of a run.
///
/// Shared with the device cuts, which copy the track quality cut from here.
#[derive(Debug)]
pub struct TrackCuts {
    run: Arc<RunContext>,
    registry: CutRegistry,
    surface: bool,
}

impl TrackCuts {
    pub fn new(run: Arc<RunContext>) -> CutResult<Self> {
        let registry = CutRegistry::for_run(&run, NAMESPACE, Space::Track)?;
        Ok(Self {
            run,
            registry,
            surface: false,
        })
    }

    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    pub fn is_surface(&self) -> bool {
        self.surface
    }

    /// Register the track pipeline. Without `redo`, cuts that are present or
    /// cached are not recomputed.
    pub fn make(&mut self, redo: bool) -> CutResult<()> {
        let run = Arc::clone(&self.run);
        let cuts = &run.config().cuts;
        let [low, high] = cuts.trigger_phase;

        self.registry.register_with(
            "tp",
            10,
            &format!("trigger phase in [{low}, {high}]"),
            redo,
            || generators::trigger_phase(&run),
        )?;
        match run.config().reference_plane {
            Some(reference) => self.registry.register_with(
                "res",
                20,
                &format!("residual on plane {reference} below {}", cuts.ref_max_residual),
                redo,
                || {
                    let clusters = generators::residual(&run, reference, cuts.ref_max_residual)?;
                    run.model().dut2trk(&clusters)
                },
            )?,
            None => log::warn!("no reference plane configured, skipping track residual cut"),
        }
        self.set_fiducial(self.surface)?;
        self.registry.register_with(
            "tstart",
            40,
            &format!("exclude first {}s", cuts.start_time),
            redo,
            || generators::start_time(&run),
        )?;
        self.registry.register_with(
            "chi2",
            50,
            &format!("chi2 below {} quantile", cuts.chi2_quantile),
            redo,
            || generators::chi2(&run),
        )?;

        log::info!(
            "track cuts: {} of {} tracks pass",
            self.registry.combined()?.count(),
            run.n_tracks()
        );
        Ok(())
    }

    /// Re-register the fiducial cut with the surface or the bulk region.
    ///
    /// The cut is rebuilt directly instead of through the cache since its mask
    /// depends on the mode.
    pub fn set_fiducial(&mut self, surface: bool) -> CutResult<()> {
        let run = &self.run;
        let dut = run.dut();
        let mask = generators::fiducial(
            &run.plane_tracks(dut, "X")?,
            &run.plane_tracks(dut, "Y")?,
            run.config().cuts.fiducial_region(surface),
        )?;
        let mode = if surface { "surface" } else { "bulk" };
        self.registry
            .register(FIDUCIAL, mask, 30, &format!("{mode} fiducial area at plane {dut}"))?;
        self.surface = surface;
        Ok(())
    }
}

impl Deref for TrackCuts {
    type Target = CutRegistry;

    fn deref(&self) -> &CutRegistry {
        &self.registry
    }
}

impl DerefMut for TrackCuts {
    fn deref_mut(&mut self) -> &mut CutRegistry {
        &mut self.registry
    }
}
