/*!
Lagrangian drift simulation: a bracketed particle store plus the time-stepping
driver that advances it through a velocity field.
*/

mod platform;
mod simulation;

pub use simulation::*;

pub use platform::start;
pub use platform::vtk_writer::VtkParticleWriter;
