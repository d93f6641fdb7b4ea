use crate::error::{Error, Result};
use crate::floating_type_mod::FT;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable particle identity, assigned once at creation and never reused while
/// the record is live.
pub type ParticleId = u64;

/// Per-particle status as left behind by the last kernel pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCode {
    /// Freshly created, not yet touched by any kernel.
    Evaluate,
    Success,
    /// Marked for removal from the set.
    Delete,
    ErrorOutOfBounds,
    ErrorInterpolation,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrKind {
    Float,
    Int,
}

/// One scalar attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Float(FT),
    Int(i64),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Float(_) => AttrKind::Float,
            AttrValue::Int(_) => AttrKind::Int,
        }
    }

    pub fn as_float(&self) -> FT {
        match self {
            AttrValue::Float(x) => *x,
            AttrValue::Int(x) => *x as FT,
        }
    }
}

/// Declaration of one user attribute: name, scalar type and default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDef {
    pub name: String,
    pub kind: AttrKind,
    pub default: AttrValue,
}

/// The fixed attribute layout of one particle class.
///
/// The set of attributes is declared up front; unknown names are rejected at
/// population construction, not on first access. Every record of a set shares
/// the same schema, attribute values are stored positionally in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleSchema {
    attrs: Vec<AttrDef>,
}

impl ParticleSchema {
    pub fn new() -> ParticleSchema {
        ParticleSchema { attrs: Vec::new() }
    }

    pub fn with_float(mut self, name: &str, default: FT) -> ParticleSchema {
        self.attrs.push(AttrDef {
            name: name.to_string(),
            kind: AttrKind::Float,
            default: AttrValue::Float(default),
        });
        self
    }

    pub fn with_int(mut self, name: &str, default: i64) -> ParticleSchema {
        self.attrs.push(AttrDef {
            name: name.to_string(),
            kind: AttrKind::Int,
            default: AttrValue::Int(default),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn defs(&self) -> &[AttrDef] {
        &self.attrs
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name == name)
    }

    /// Slot index for `name`, or `InvalidArgument` for a name the particle
    /// class does not declare.
    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::InvalidArgument(format!("particle class does not have attribute `{}`", name)))
    }

    pub fn default_values(&self) -> Vec<AttrValue> {
        self.attrs.iter().map(|a| a.default).collect()
    }
}

/// One simulated particle.
///
/// `lon`/`lat`/`depth` use the set-wide position precision `FT`; `time` and
/// `dt` are always `f64` seconds relative to the simulation time origin. An
/// unset `time` is `NaN` until the execution driver resolves it from the field
/// time range and the sign of `dt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: ParticleId,
    pub lon: FT,
    pub lat: FT,
    pub depth: FT,
    pub time: f64,
    pub dt: f64,
    pub state: StateCode,
    pub attrs: Vec<AttrValue>,
}

impl ParticleRecord {
    pub fn new(id: ParticleId, lon: FT, lat: FT, depth: FT, time: f64, schema: &ParticleSchema) -> ParticleRecord {
        ParticleRecord {
            id,
            lon,
            lat,
            depth,
            time,
            dt: 0.,
            state: StateCode::Evaluate,
            attrs: schema.default_values(),
        }
    }

    pub fn attr(&self, schema: &ParticleSchema, name: &str) -> Result<AttrValue> {
        Ok(self.attrs[schema.resolve(name)?])
    }

    pub fn set_attr(&mut self, schema: &ParticleSchema, name: &str, value: AttrValue) -> Result<()> {
        let slot = schema.resolve(name)?;
        if schema.defs()[slot].kind != value.kind() {
            return Err(Error::InvalidArgument(format!(
                "attribute `{}` expects {:?}, got {:?}",
                name,
                schema.defs()[slot].kind,
                value.kind()
            )));
        }
        self.attrs[slot] = value;
        Ok(())
    }
}

impl fmt::Display for ParticleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P[{}](lon={}, lat={}, depth={}, time={})",
            self.id, self.lon, self.lat, self.depth, self.time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_resolves_declared_attributes() -> Result<()> {
        let schema = ParticleSchema::new().with_float("age", 0.).with_int("origin", -1);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.resolve("age")?, 0);
        assert_eq!(schema.resolve("origin")?, 1);
        assert!(schema.resolve("unknown").is_err());
        Ok(())
    }

    #[test]
    fn record_gets_schema_defaults() -> Result<()> {
        let schema = ParticleSchema::new().with_float("age", 3.5);
        let mut p = ParticleRecord::new(7, 1., 2., 0., 0., &schema);
        assert_eq!(p.attr(&schema, "age")?, AttrValue::Float(3.5));
        p.set_attr(&schema, "age", AttrValue::Float(4.))?;
        assert_eq!(p.attr(&schema, "age")?, AttrValue::Float(4.));
        // type mismatch is rejected
        assert!(p.set_attr(&schema, "age", AttrValue::Int(4)).is_err());
        Ok(())
    }
}
