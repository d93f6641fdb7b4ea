use crate::error::Result;
use crate::particle::ParticleRecord;
use crate::particle_set::ParticleSet;

/// Contract of the snapshot writer collaborator.
///
/// The driver calls `write` once before the loop, at every output event and
/// once after the run; the kernel span hands records that leave the set to
/// `write_deleted` before discarding them.
pub trait ParticleWriter {
    /// Period of the output event stream, in seconds.
    fn output_interval(&self) -> f64;

    /// Append a snapshot of every live particle at `time`.
    fn write(&mut self, particles: &ParticleSet, time: f64) -> Result<()>;

    /// Record particles removed during a kernel span. Default: drop silently.
    fn write_deleted(&mut self, _records: &[ParticleRecord], _time: f64) -> Result<()> {
        Ok(())
    }
}

/// Contract of the animation collaborator: render one frame of the current
/// set. No rendering backend ships with this crate; the trait is the seam.
pub trait FrameRenderer {
    fn render(&mut self, particles: &ParticleSet, time: f64) -> Result<()>;
}
