//! Mask generators of the cut pipelines.
//!
//! Each generator reads columns from the run and the thresholds from its
//! configuration and returns a mask in the space the condition is natural in.
//! The registries bring them into their native space when combining.

use crate::data::filter::{at_least, below_quantile, hypot, in_int_range, in_region, Region};
use crate::error::CutResult;
use crate::run::RunContext;
use crate::space::{Mask, PlaneId, SpaceArray};

/// Events whose trigger phase lies in the configured range.
pub fn trigger_phase(run: &RunContext) -> CutResult<Mask> {
    let [low, high] = run.config().cuts.trigger_phase;
    Ok(in_int_range(&run.event_ints("TriggerPhase")?, low, high))
}

/// Events recorded after the configured start-up time.
pub fn start_time(run: &RunContext) -> CutResult<Mask> {
    Ok(at_least(&run.events("Time")?, run.config().cuts.start_time))
}

/// Tracks whose chi2 is not above the configured quantile.
pub fn chi2(run: &RunContext) -> CutResult<Mask> {
    Ok(below_quantile(
        &run.tracks("Chi2")?,
        run.config().cuts.chi2_quantile,
    ))
}

/// Entries whose local position lies inside `region`.
pub fn fiducial(
    x: &SpaceArray<f64>,
    y: &SpaceArray<f64>,
    region: Option<&Region>,
) -> CutResult<Mask> {
    in_region(x, y, region)
}

/// Clusters on `plane` within `max` of their track.
pub fn residual(run: &RunContext, plane: PlaneId, max: f64) -> CutResult<Mask> {
    let distance = hypot(&run.residual(plane, "U")?, &run.residual(plane, "V")?)?;
    Ok(distance.map(|&d| d <= max))
}

/// Clusters on `plane` with at most `max` pixels.
pub fn cluster_size(run: &RunContext, plane: PlaneId, max: i64) -> CutResult<Mask> {
    Ok(in_int_range(&run.cluster_ints(plane, "Size")?, 1, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::testing::{run, DUT, REF};
    use crate::space::Space;

    #[test]
    fn test_event_generators() {
        let run = run();
        let tp = trigger_phase(&run).unwrap();
        assert_eq!(tp.space(), Space::Event);
        assert_eq!(tp.values(), &[true, true, false, false, true, true]);
        assert_eq!(
            start_time(&run).unwrap().values(),
            &[false, true, true, true, true, true]
        );
    }

    #[test]
    fn test_chi2_quantile() {
        let run = run();
        // 80% quantile of the six chi2 values is 8.0
        assert_eq!(
            chi2(&run).unwrap().values(),
            &[true, true, true, true, true, false]
        );
    }

    #[test]
    fn test_residual_on_device_and_reference() {
        let run = run();
        let dut = residual(&run, DUT, 0.3).unwrap();
        assert_eq!(dut.space(), Space::Cluster(DUT));
        assert_eq!(dut.values(), &[true, true, true, false, true]);
        assert_eq!(
            residual(&run, REF, 0.2).unwrap().values(),
            &[true, false, true, true]
        );
    }

    #[test]
    fn test_fiducial_and_cluster_size() {
        let run = run();
        let region = Region::rect(0.0, 60.0, 0.0, 60.0);
        let mask = fiducial(
            &run.clusters(DUT, "X").unwrap(),
            &run.clusters(DUT, "Y").unwrap(),
            Some(&region),
        )
        .unwrap();
        assert_eq!(mask.values(), &[true, true, true, true, false]);

        let everything = fiducial(
            &run.clusters(DUT, "X").unwrap(),
            &run.clusters(DUT, "Y").unwrap(),
            None,
        )
        .unwrap();
        assert_eq!(everything.count(), 5);

        assert_eq!(
            cluster_size(&run, DUT, 2).unwrap().values(),
            &[true, true, true, false, true]
        );
    }
}
