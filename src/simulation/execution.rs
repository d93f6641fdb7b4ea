use crate::error::{Error, Result};
use crate::fieldset::FieldSetTrait;
use crate::kernel::{execute_kernel, Kernel, RecoveryPolicy};
use crate::output::{FrameRenderer, ParticleWriter};
use crate::particle_set::ParticleSet;
use crate::scheduler::{EventKind, EventTable, ENDTIME_TOL};

/// Arguments of one `execute` run. Exactly one of `endtime`/`runtime` may be
/// given; with neither, the run extends to the bound of the field time range
/// in the direction of `dt`.
pub struct ExecuteOptions<'a> {
    pub endtime: Option<f64>,
    pub runtime: Option<f64>,
    pub dt: f64,
    pub output: Option<&'a mut dyn ParticleWriter>,
    pub animation: Option<&'a mut dyn FrameRenderer>,
    pub movie_dt: Option<f64>,
    pub callbacks: Vec<&'a mut dyn FnMut()>,
    pub callback_dt: Option<f64>,
    pub recovery: RecoveryPolicy,
    pub verbose: bool,
}

impl<'a> ExecuteOptions<'a> {
    pub fn new(dt: f64) -> ExecuteOptions<'a> {
        ExecuteOptions {
            endtime: None,
            runtime: None,
            dt,
            output: None,
            animation: None,
            movie_dt: None,
            callbacks: Vec::new(),
            callback_dt: None,
            recovery: RecoveryPolicy::default(),
            verbose: false,
        }
    }

    pub fn with_endtime(mut self, endtime: f64) -> ExecuteOptions<'a> {
        self.endtime = Some(endtime);
        self
    }

    pub fn with_runtime(mut self, runtime: f64) -> ExecuteOptions<'a> {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_output(mut self, writer: &'a mut dyn ParticleWriter) -> ExecuteOptions<'a> {
        self.output = Some(writer);
        self
    }

    pub fn with_animation(mut self, renderer: &'a mut dyn FrameRenderer, movie_dt: f64) -> ExecuteOptions<'a> {
        self.animation = Some(renderer);
        self.movie_dt = Some(movie_dt);
        self
    }

    /// Register a post-iteration callback; callbacks run in registration
    /// order with no arguments.
    pub fn with_callback(mut self, callback: &'a mut dyn FnMut()) -> ExecuteOptions<'a> {
        self.callbacks.push(callback);
        self
    }

    pub fn with_callback_dt(mut self, callback_dt: f64) -> ExecuteOptions<'a> {
        self.callback_dt = Some(callback_dt);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> ExecuteOptions<'a> {
        self.recovery = recovery;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> ExecuteOptions<'a> {
        self.verbose = verbose;
        self
    }
}

impl ParticleSet {
    /// Run the given kernel over the set until the end time is reached.
    ///
    /// Each iteration stops at the nearest pending event time (release, input
    /// chunk, output, animation, callback) or the run end, delegates physics
    /// for that span to the kernel, then fires every event that landed on the
    /// stopping time in fixed order: release before output before animation
    /// before callback. Input-chunk advance is requested only when the stop is
    /// not the end of the run. With a zero time span or zero `dt` the kernel
    /// executes exactly once without incrementing time.
    pub fn execute(&mut self, kernel: Kernel, mut options: ExecuteOptions<'_>) -> Result<()> {
        if options.runtime.is_some() && options.endtime.is_some() {
            return Err(Error::InvalidArgument(
                "only one of endtime and runtime can be specified".to_string(),
            ));
        }
        if let Some(runtime) = options.runtime {
            if runtime < 0. {
                return Err(Error::InvalidArgument("runtime must be positive".to_string()));
            }
        }
        if self.kernel != Some(kernel) {
            self.kernel = Some(kernel);
        }
        let mut dt = options.dt;

        // unset particle times default to the field time bound facing the run
        let (field_tmin, field_tmax) = self.fieldset().time_range();
        let mut default_time = if dt >= 0. { field_tmin } else { field_tmax };
        if !default_time.is_finite() {
            default_time = 0.;
        }
        for p in self.iter_mut() {
            if p.time.is_nan() {
                p.time = default_time;
            }
        }

        let mut start_time = if dt >= 0. {
            self.iter().map(|p| p.time).fold(f64::INFINITY, f64::min)
        } else {
            self.iter().map(|p| p.time).fold(f64::NEG_INFINITY, f64::max)
        };
        if !start_time.is_finite() {
            start_time = if default_time.is_finite() { default_time } else { 0. };
        }
        if let Some(rep) = &mut self.repeat {
            if rep.start_time.is_none() {
                rep.start_time = Some(start_time);
            }
        }

        let mut endtime = match (options.runtime, options.endtime) {
            (Some(runtime), None) => start_time + runtime * dt.signum(),
            (None, Some(endtime)) => endtime,
            _ => {
                if dt >= 0. {
                    field_tmax
                } else {
                    field_tmin
                }
            }
        };

        let execute_once = (endtime - start_time).abs() < ENDTIME_TOL || dt == 0. || options.runtime == Some(0.);
        if execute_once {
            dt = 0.;
            endtime = start_time;
            println!(
                "dt or runtime are zero, or endtime equals the particle start time; \
                 the kernel will be executed once without incrementing time"
            );
        }
        if !endtime.is_finite() {
            return Err(Error::InvalidArgument(
                "an endtime or runtime is required when the field set is unbounded in time".to_string(),
            ));
        }

        for p in self.iter_mut() {
            p.dt = dt;
        }

        // first output write before the loop, particles could have been added
        if let Some(writer) = options.output.as_mut() {
            writer.write(self, start_time)?;
        }
        if options.movie_dt.is_some() {
            if let Some(renderer) = options.animation.as_mut() {
                renderer.render(self, start_time)?;
            }
        }

        let output_dt = options
            .output
            .as_ref()
            .map(|writer| writer.output_interval())
            .unwrap_or(f64::INFINITY);
        let movie_dt = options.movie_dt.unwrap_or(f64::INFINITY);
        let repeat_dt = self.repeat.as_ref().map(|rep| rep.interval);
        let callback_dt = options.callback_dt.unwrap_or_else(|| {
            let mut interrupt_dts = vec![f64::INFINITY, movie_dt, output_dt];
            if let Some(repeat_dt) = repeat_dt {
                interrupt_dts.push(repeat_dt);
            }
            interrupt_dts.into_iter().fold(f64::INFINITY, f64::min)
        });

        let mut table = EventTable::new(dt > 0.);
        let sign = table.sign();
        let mut time = start_time;
        if let Some(rep) = &self.repeat {
            let repeat_start = rep.start_time.unwrap_or(start_time);
            let intervals = ((time - repeat_start).abs() / rep.interval).floor() + 1.;
            table.set(EventKind::Release, repeat_start + intervals * rep.interval * sign);
        }
        table.set(EventKind::Output, time + output_dt * sign);
        table.set(EventKind::Animation, time + movie_dt * sign);
        table.set(EventKind::Callback, time + callback_dt * sign);
        table.set(EventKind::InputChunk, self.fieldset().compute_time_chunk(time, dt)?);

        let mut iteration: usize = 0;
        while (time < endtime && dt > 0.) || (time > endtime && dt < 0.) || dt == 0. {
            let target = if dt == 0. { endtime } else { table.next_target(endtime) };
            execute_kernel(
                kernel,
                self,
                target,
                dt,
                &options.recovery,
                options.output.as_deref_mut(),
                execute_once,
            )?;
            time = target;
            if options.verbose {
                println!("{:05}: {} particles, computed time = {}", iteration, self.size(), time);
            }

            for kind in EventKind::FIRING_ORDER {
                if !table.due(kind, time) {
                    continue;
                }
                match kind {
                    EventKind::Release => {
                        if let Some(rep) = self.repeat.clone() {
                            let released = self.instantiate_repeat(&rep, time, dt)?;
                            self.add(released)?;
                            table.advance(EventKind::Release, rep.interval);
                        }
                    }
                    EventKind::Output => {
                        if let Some(writer) = options.output.as_mut() {
                            writer.write(self, time)?;
                        }
                        table.advance(EventKind::Output, output_dt);
                    }
                    EventKind::Animation => {
                        if let Some(renderer) = options.animation.as_mut() {
                            renderer.render(self, time)?;
                        }
                        table.advance(EventKind::Animation, movie_dt);
                    }
                    EventKind::Callback => {
                        for callback in options.callbacks.iter_mut() {
                            callback();
                        }
                        table.advance(EventKind::Callback, callback_dt);
                    }
                    // only a stopping-time contributor, re-armed below
                    EventKind::InputChunk => {}
                }
            }

            if time != endtime {
                table.set(EventKind::InputChunk, self.fieldset().compute_time_chunk(time, dt)?);
            }
            if dt == 0. {
                break;
            }
            iteration += 1;
        }

        if let Some(writer) = options.output.as_mut() {
            writer.write(self, time)?;
        }
        Ok(())
    }
}
