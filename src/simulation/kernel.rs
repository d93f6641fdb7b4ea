use crate::concurrency::par_iter_mut1;
use crate::error::{Error, Result};
use crate::fieldset::{FieldSet, FieldSetTrait};
use crate::floating_type_mod::FT;
use crate::output::ParticleWriter;
use crate::particle::{ParticleRecord, StateCode};
use crate::particle_set::ParticleSet;
use crate::scheduler::TOL;
use enum_dispatch::enum_dispatch;
use std::collections::HashMap;

/// One advection sub-step: update a particle's position from the field at its
/// current position and time. Time bookkeeping stays with the executor.
#[enum_dispatch]
pub trait KernelTrait {
    fn step(&self, p: &mut ParticleRecord, fieldset: &FieldSet, dt: f64) -> StateCode;
}

/// Keeps particles where they are. Useful as a scheduling no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvectionNone;

impl KernelTrait for AdvectionNone {
    fn step(&self, _p: &mut ParticleRecord, _fieldset: &FieldSet, _dt: f64) -> StateCode {
        StateCode::Success
    }
}

/// Explicit (forward) Euler advection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvectionEE;

impl KernelTrait for AdvectionEE {
    fn step(&self, p: &mut ParticleRecord, fieldset: &FieldSet, dt: f64) -> StateCode {
        match fieldset.velocity(p.time, p.depth, p.lat, p.lon) {
            Ok([u, v, w]) => {
                let h = dt as FT;
                p.lon += u * h;
                p.lat += v * h;
                p.depth += w * h;
                StateCode::Success
            }
            Err(Error::OutOfDomain(..)) => StateCode::ErrorOutOfBounds,
            Err(_) => StateCode::ErrorInterpolation,
        }
    }
}

/// Fourth-order Runge-Kutta advection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvectionRK4;

impl KernelTrait for AdvectionRK4 {
    fn step(&self, p: &mut ParticleRecord, fieldset: &FieldSet, dt: f64) -> StateCode {
        let h = dt as FT;
        let sample = |time: f64, depth: FT, lat: FT, lon: FT| fieldset.velocity(time, depth, lat, lon);
        let result = (|| {
            let [u1, v1, w1] = sample(p.time, p.depth, p.lat, p.lon)?;
            let half = dt * 0.5;
            let [u2, v2, w2] = sample(
                p.time + half,
                p.depth + w1 * h / 2.,
                p.lat + v1 * h / 2.,
                p.lon + u1 * h / 2.,
            )?;
            let [u3, v3, w3] = sample(
                p.time + half,
                p.depth + w2 * h / 2.,
                p.lat + v2 * h / 2.,
                p.lon + u2 * h / 2.,
            )?;
            let [u4, v4, w4] = sample(p.time + dt, p.depth + w3 * h, p.lat + v3 * h, p.lon + u3 * h)?;
            p.lon += (u1 + 2. * u2 + 2. * u3 + u4) * h / 6.;
            p.lat += (v1 + 2. * v2 + 2. * v3 + v4) * h / 6.;
            p.depth += (w1 + 2. * w2 + 2. * w3 + w4) * h / 6.;
            Ok(())
        })();
        match result {
            Ok(()) => StateCode::Success,
            Err(Error::OutOfDomain(..)) => StateCode::ErrorOutOfBounds,
            Err(_) => StateCode::ErrorInterpolation,
        }
    }
}

/// The advection kernels known to this crate.
#[enum_dispatch(KernelTrait)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    AdvectionNone(AdvectionNone),
    AdvectionEE(AdvectionEE),
    AdvectionRK4(AdvectionRK4),
}

/// What to do with a particle whose kernel pass left an error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Remove the particle from the set and carry on.
    Delete,
    /// Reset the particle to success and carry on.
    Ignore,
    /// Abort the run.
    Fail,
}

/// Per-state-code recovery decisions applied inside the kernel span. Failures
/// resolved here never reach the stepping loop; anything mapped to (or
/// defaulting to) `Fail` aborts the run as a fatal kernel failure.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    actions: HashMap<StateCode, RecoveryAction>,
}

impl Default for RecoveryPolicy {
    /// Out-of-domain particles are dropped, everything else is fatal.
    fn default() -> RecoveryPolicy {
        let mut actions = HashMap::new();
        actions.insert(StateCode::ErrorOutOfBounds, RecoveryAction::Delete);
        RecoveryPolicy { actions }
    }
}

impl RecoveryPolicy {
    pub fn with_action(mut self, code: StateCode, action: RecoveryAction) -> RecoveryPolicy {
        self.actions.insert(code, action);
        self
    }

    pub fn action_for(&self, code: StateCode) -> RecoveryAction {
        self.actions.get(&code).copied().unwrap_or(RecoveryAction::Fail)
    }
}

/// Advance every live particle of the set to `endtime` in `dt`-sized
/// sub-steps (one zero-advance invocation in single-shot mode), then resolve
/// failures through the recovery policy and physically remove particles marked
/// for deletion, dumping them to the writer if one is present.
///
/// Advection runs in parallel across the records of each bracket; everything
/// that mutates the bracket structure happens sequentially afterwards.
pub fn execute_kernel(
    kernel: Kernel,
    pset: &mut ParticleSet,
    endtime: f64,
    dt: f64,
    recovery: &RecoveryPolicy,
    mut writer: Option<&mut (dyn ParticleWriter + '_)>,
    execute_once: bool,
) -> Result<()> {
    let fieldset = pset.fieldset().clone();
    for bracket in pset.brackets_mut() {
        par_iter_mut1(bracket.records_mut(), |_, p| {
            if p.state == StateCode::Delete {
                return;
            }
            if execute_once || dt == 0. || p.dt == 0. {
                p.state = kernel.step(p, &fieldset, 0.);
                return;
            }
            let sign = if dt > 0. { 1. } else { -1. };
            let mut state = StateCode::Success;
            while (endtime - p.time) * sign > TOL {
                let remaining = endtime - p.time;
                let step_dt = if sign > 0. {
                    p.dt.min(remaining)
                } else {
                    p.dt.max(remaining)
                };
                state = kernel.step(p, &fieldset, step_dt);
                if state != StateCode::Success {
                    break;
                }
                p.time += step_dt;
            }
            p.state = state;
        });
    }

    let mut doomed: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut fatal: Option<(u64, StateCode)> = None;
    for (bracket_index, bracket) in pset.brackets_mut().iter_mut().enumerate() {
        let mut slots = Vec::new();
        for (slot, p) in bracket.records_mut().iter_mut().enumerate() {
            match p.state {
                StateCode::Success | StateCode::Evaluate => {}
                StateCode::Delete => slots.push(slot),
                code => match recovery.action_for(code) {
                    RecoveryAction::Delete => slots.push(slot),
                    RecoveryAction::Ignore => p.state = StateCode::Success,
                    RecoveryAction::Fail => {
                        if fatal.is_none() {
                            fatal = Some((p.id, code));
                        }
                    }
                },
            }
        }
        if !slots.is_empty() {
            doomed.push((bracket_index, slots));
        }
    }
    if let Some((id, code)) = fatal {
        return Err(Error::FatalKernel(format!("particle {} failed with {:?}", id, code)));
    }
    if !doomed.is_empty() {
        let removed = pset.remove_grouped(doomed)?;
        let records: Vec<ParticleRecord> = removed.into_iter().map(|(_, record)| record).collect();
        if let Some(w) = writer.as_mut() {
            w.write_deleted(&records, endtime)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldset::{GriddedFieldSet, UniformFieldSet};
    use crate::identity::IdentityAllocator;
    use crate::particle::ParticleSchema;
    use crate::particle_set::ReleaseTimes;
    use std::sync::{Arc, Mutex};

    fn uniform(u: FT, v: FT) -> Arc<FieldSet> {
        Arc::new(FieldSet::UniformFieldSet(UniformFieldSet::new(u, v, 0.)))
    }

    fn pset_at(fieldset: Arc<FieldSet>, lon: &[FT], lat: &[FT], dt: f64) -> ParticleSet {
        let mut pset = ParticleSet::new(
            fieldset,
            Arc::new(ParticleSchema::new()),
            Arc::new(Mutex::new(IdentityAllocator::new())),
            lon,
            lat,
            None,
            ReleaseTimes::Scalar(0.),
            None,
            &[],
        )
        .unwrap();
        for p in pset.iter_mut() {
            p.dt = dt;
        }
        pset
    }

    #[test]
    fn euler_advects_with_the_flow() -> Result<()> {
        let mut pset = pset_at(uniform(1., 0.5), &[0.], &[0.], 1.);
        execute_kernel(
            Kernel::from(AdvectionEE),
            &mut pset,
            4.,
            1.,
            &RecoveryPolicy::default(),
            None,
            false,
        )?;
        let p = pset.get(0)?;
        assert!((p.lon - 4.).abs() < 1e-4);
        assert!((p.lat - 2.).abs() < 1e-4);
        assert_eq!(p.time, 4.);
        assert_eq!(p.state, StateCode::Success);
        Ok(())
    }

    #[test]
    fn rk4_matches_euler_in_a_uniform_flow() -> Result<()> {
        let mut pset = pset_at(uniform(2., -1.), &[0.], &[0.], 0.5);
        execute_kernel(
            Kernel::from(AdvectionRK4),
            &mut pset,
            3.,
            0.5,
            &RecoveryPolicy::default(),
            None,
            false,
        )?;
        let p = pset.get(0)?;
        assert!((p.lon - 6.).abs() < 1e-3);
        assert!((p.lat + 3.).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn out_of_domain_particles_are_deleted_by_default() -> Result<()> {
        // 2x2 domain, eastward flow pushes the right particle off the grid
        let lon = vec![0., 1., 2.];
        let lat = vec![0., 1.];
        let time = vec![0., 100.];
        let n = lon.len() * lat.len() * time.len();
        let grid = GriddedFieldSet::new(lon, lat, time, vec![1.; n], vec![0.; n], 2)?;
        let fieldset = Arc::new(FieldSet::GriddedFieldSet(grid));
        fieldset.compute_time_chunk(0., 1.)?;
        let mut pset = pset_at(fieldset, &[0.1, 1.9], &[0.5, 0.5], 0.5);
        execute_kernel(
            Kernel::from(AdvectionEE),
            &mut pset,
            1.,
            0.5,
            &RecoveryPolicy::default(),
            None,
            false,
        )?;
        assert_eq!(pset.size(), 1);
        assert!((pset.get(0)?.lon - 0.6).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn unresolved_failures_are_fatal() -> Result<()> {
        let lon = vec![0., 1.];
        let lat = vec![0., 1.];
        let time = vec![0., 100.];
        let n = lon.len() * lat.len() * time.len();
        let grid = GriddedFieldSet::new(lon, lat, time, vec![1.; n], vec![0.; n], 2)?;
        let fieldset = Arc::new(FieldSet::GriddedFieldSet(grid));
        fieldset.compute_time_chunk(0., 1.)?;
        let mut pset = pset_at(fieldset, &[0.9], &[0.5], 1.);
        let policy = RecoveryPolicy::default().with_action(StateCode::ErrorOutOfBounds, RecoveryAction::Fail);
        let result = execute_kernel(Kernel::from(AdvectionEE), &mut pset, 5., 1., &policy, None, false);
        assert!(matches!(result, Err(Error::FatalKernel(_))));
        Ok(())
    }

    #[test]
    fn ignored_failures_keep_the_particle() -> Result<()> {
        let lon = vec![0., 1.];
        let lat = vec![0., 1.];
        let time = vec![0., 100.];
        let n = lon.len() * lat.len() * time.len();
        let grid = GriddedFieldSet::new(lon, lat, time, vec![1.; n], vec![0.; n], 2)?;
        let fieldset = Arc::new(FieldSet::GriddedFieldSet(grid));
        fieldset.compute_time_chunk(0., 1.)?;
        let mut pset = pset_at(fieldset, &[0.9], &[0.5], 1.);
        let policy = RecoveryPolicy::default().with_action(StateCode::ErrorOutOfBounds, RecoveryAction::Ignore);
        execute_kernel(Kernel::from(AdvectionEE), &mut pset, 5., 1., &policy, None, false)?;
        assert_eq!(pset.size(), 1);
        assert_eq!(pset.get(0)?.state, StateCode::Success);
        Ok(())
    }

    #[test]
    fn default_policy_fails_unknown_errors() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.action_for(StateCode::ErrorOutOfBounds), RecoveryAction::Delete);
        assert_eq!(policy.action_for(StateCode::Error), RecoveryAction::Fail);
        assert_eq!(policy.action_for(StateCode::ErrorInterpolation), RecoveryAction::Fail);
    }
}
