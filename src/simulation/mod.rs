pub mod bracket;
pub mod concurrency;
pub mod error;
pub mod execution;
pub mod fieldset;
pub mod identity;
pub mod kernel;
pub mod output;
pub mod particle;
pub mod particle_set;
pub mod scheduler;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
}

pub use error::{Error, Result};
pub use execution::ExecuteOptions;
pub use fieldset::{FieldSet, FieldSetTrait, GriddedFieldSet, UniformFieldSet};
pub use identity::{IdentityAllocator, IdentityReduction, LocalReduction};
pub use kernel::{AdvectionEE, AdvectionNone, AdvectionRK4, Kernel, KernelTrait, RecoveryAction, RecoveryPolicy};
pub use output::{FrameRenderer, ParticleWriter};
pub use particle::{AttrDef, AttrKind, AttrValue, ParticleId, ParticleRecord, ParticleSchema, StateCode};
pub use particle_set::{ParticleSet, ReleaseTimes, StartField, BRACKET_CAPACITY};
