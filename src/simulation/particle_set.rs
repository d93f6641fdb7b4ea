use crate::bracket::Bracket;
use crate::error::{Error, Result};
use crate::fieldset::{FieldSet, FieldSetTrait};
use crate::floating_type_mod::FT;
use crate::identity::IdentityAllocator;
use crate::kernel::Kernel;
use crate::particle::{AttrValue, ParticleId, ParticleRecord, ParticleSchema, StateCode};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Default upper bound on records per bracket.
pub const BRACKET_CAPACITY: usize = 4096;

/// Release time argument, normalized here at the API boundary: a single value
/// is broadcast over all particles, `Unset` leaves times `NaN` until the
/// execution driver resolves them from the field time range.
#[derive(Debug, Clone)]
pub enum ReleaseTimes {
    Unset,
    Scalar(f64),
    PerParticle(Vec<f64>),
}

impl ReleaseTimes {
    fn normalized(&self, n: usize) -> Result<Vec<f64>> {
        match self {
            ReleaseTimes::Unset => Ok(vec![f64::NAN; n]),
            ReleaseTimes::Scalar(t) => Ok(vec![*t; n]),
            ReleaseTimes::PerParticle(times) => {
                if times.len() != n {
                    return Err(Error::InvalidArgument(format!(
                        "time and positions don't have the same lengths ({} vs {})",
                        times.len(),
                        n
                    )));
                }
                Ok(times.clone())
            }
        }
    }
}

/// Cell-weighted 2-D distribution for monte-carlo particle release.
#[derive(Debug, Clone)]
pub struct StartField {
    pub lon: Vec<FT>,
    pub lat: Vec<FT>,
    /// Row-major cell weights, `(lat.len()-1) * (lon.len()-1)` entries.
    pub weights: Vec<FT>,
}

/// Template for periodic re-release of the initial sub-population.
#[derive(Debug, Clone)]
pub(crate) struct RepeatRelease {
    pub interval: f64,
    pub start_time: Option<f64>,
    pub lon: Vec<FT>,
    pub lat: Vec<FT>,
    pub depth: Vec<FT>,
    pub attrs: Vec<Vec<AttrValue>>,
    pub pid_offsets: Vec<ParticleId>,
}

/// Container for particle records, partitioned into capacity-bounded brackets,
/// plus everything needed to step them through time: the shared field set, the
/// particle-class schema, the identity allocator handle and the optional
/// repeat-release template.
///
/// Global indices are positional over the concatenation of all brackets and
/// are NOT stable across mutation; identities are.
pub struct ParticleSet {
    brackets: Vec<Bracket>,
    bracket_capacity: usize,
    fieldset: Arc<FieldSet>,
    schema: Arc<ParticleSchema>,
    ids: Arc<Mutex<IdentityAllocator>>,
    pub(crate) repeat: Option<RepeatRelease>,
    pub(crate) kernel: Option<Kernel>,
    time_origin: f64,
}

impl ParticleSet {
    /// Build a set from coordinate arrays. Scalar-or-array argument shapes are
    /// normalized here; identities are `allocator base + i` and the allocator
    /// is advanced past the largest assigned identity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fieldset: Arc<FieldSet>,
        schema: Arc<ParticleSchema>,
        ids: Arc<Mutex<IdentityAllocator>>,
        lon: &[FT],
        lat: &[FT],
        depth: Option<&[FT]>,
        time: ReleaseTimes,
        repeat_dt: Option<f64>,
        attrs: &[(&str, Vec<AttrValue>)],
    ) -> Result<ParticleSet> {
        let n = lon.len();
        if lat.len() != n {
            return Err(Error::InvalidArgument(format!(
                "lon and lat don't have the same lengths ({} vs {})",
                n,
                lat.len()
            )));
        }
        let depth = match depth {
            Some(d) => {
                if d.len() != n {
                    return Err(Error::InvalidArgument(format!(
                        "depth and positions don't have the same lengths ({} vs {})",
                        d.len(),
                        n
                    )));
                }
                d.to_vec()
            }
            None => vec![fieldset.min_depth(); n],
        };
        let times = time.normalized(n)?;

        // attribute columns: defaults first, declared columns overwrite
        let mut attr_rows: Vec<Vec<AttrValue>> = (0..n).map(|_| schema.default_values()).collect();
        for (name, values) in attrs {
            let slot = schema.resolve(name)?;
            if values.len() != n {
                return Err(Error::InvalidArgument(format!(
                    "{} and positions don't have the same lengths ({} vs {})",
                    name,
                    values.len(),
                    n
                )));
            }
            let expected = schema.defs()[slot].kind;
            for (row, value) in attr_rows.iter_mut().zip(values) {
                if value.kind() != expected {
                    return Err(Error::InvalidArgument(format!(
                        "attribute `{}` expects {:?}, got {:?}",
                        name,
                        expected,
                        value.kind()
                    )));
                }
                row[slot] = *value;
            }
        }

        let base = ids.lock().unwrap().base();
        let mut records = Vec::with_capacity(n);
        for i in 0..n {
            let mut p = ParticleRecord::new(base + i as ParticleId, lon[i], lat[i], depth[i], times[i], &schema);
            p.attrs = std::mem::take(&mut attr_rows[i]);
            records.push(p);
        }
        if let Some(max_id) = records.iter().map(|p| p.id).max() {
            ids.lock().unwrap().advance_past(max_id);
        }

        let pid_offsets = (0..n as ParticleId).collect();
        Self::build(fieldset, schema, ids, records, repeat_dt, pid_offsets, BRACKET_CAPACITY)
    }

    /// Equidistant release positions between two endpoints.
    #[allow(clippy::too_many_arguments)]
    pub fn from_line(
        fieldset: Arc<FieldSet>,
        schema: Arc<ParticleSchema>,
        ids: Arc<Mutex<IdentityAllocator>>,
        start: (FT, FT),
        finish: (FT, FT),
        size: usize,
        depth: Option<FT>,
        time: ReleaseTimes,
        repeat_dt: Option<f64>,
    ) -> Result<ParticleSet> {
        let mut lon = Vec::with_capacity(size);
        let mut lat = Vec::with_capacity(size);
        for i in 0..size {
            let frac = if size > 1 { i as FT / (size - 1) as FT } else { 0 as FT };
            lon.push(start.0 + (finish.0 - start.0) * frac);
            lat.push(start.1 + (finish.1 - start.1) * frac);
        }
        let depth = depth.map(|d| vec![d; size]);
        Self::new(fieldset, schema, ids, &lon, &lat, depth.as_deref(), time, repeat_dt, &[])
    }

    /// Monte-carlo release: draw cells proportionally to the start field's
    /// weights, then place each particle uniformly inside its cell.
    #[allow(clippy::too_many_arguments)]
    pub fn from_field(
        fieldset: Arc<FieldSet>,
        schema: Arc<ParticleSchema>,
        ids: Arc<Mutex<IdentityAllocator>>,
        start_field: &StartField,
        size: usize,
        depth: Option<FT>,
        time: ReleaseTimes,
        repeat_dt: Option<f64>,
        seed: Option<u64>,
    ) -> Result<ParticleSet> {
        if start_field.lon.len() < 2 || start_field.lat.len() < 2 {
            return Err(Error::InvalidArgument(
                "start field needs at least two samples per axis".to_string(),
            ));
        }
        let ncols = start_field.lon.len() - 1;
        let nrows = start_field.lat.len() - 1;
        if start_field.weights.len() != ncols * nrows {
            return Err(Error::InvalidArgument(format!(
                "start field weights length {} does not match {} cells",
                start_field.weights.len(),
                ncols * nrows
            )));
        }
        let dist = WeightedIndex::new(start_field.weights.iter().map(|w| *w as f64))
            .map_err(|e| Error::InvalidArgument(format!("invalid start field weights: {}", e)))?;
        let mut rng: StdRng = match seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rand::thread_rng().gen()),
        };
        let mut lon = Vec::with_capacity(size);
        let mut lat = Vec::with_capacity(size);
        for _ in 0..size {
            let cell = dist.sample(&mut rng);
            let (i, j) = (cell % ncols, cell / ncols);
            let xsi = rng.gen::<f64>() as FT;
            let eta = rng.gen::<f64>() as FT;
            lon.push(start_field.lon[i] + xsi * (start_field.lon[i + 1] - start_field.lon[i]));
            lat.push(start_field.lat[j] + eta * (start_field.lat[j + 1] - start_field.lat[j]));
        }
        let depth = depth.map(|d| vec![d; size]);
        Self::new(fieldset, schema, ids, &lon, &lat, depth.as_deref(), time, repeat_dt, &[])
    }

    /// Rebuild a set from previously captured records, e.g. the last snapshot
    /// of an earlier run. With `restart` the recorded identities are kept (and
    /// the allocator advanced past them), otherwise fresh ones are assigned.
    pub fn from_records(
        fieldset: Arc<FieldSet>,
        schema: Arc<ParticleSchema>,
        ids: Arc<Mutex<IdentityAllocator>>,
        mut records: Vec<ParticleRecord>,
        restart: bool,
    ) -> Result<ParticleSet> {
        for p in &records {
            if p.attrs.len() != schema.len() {
                return Err(Error::InvalidArgument(format!(
                    "record {} carries {} attributes, schema declares {}",
                    p.id,
                    p.attrs.len(),
                    schema.len()
                )));
            }
        }
        if restart {
            if let Some(max_id) = records.iter().map(|p| p.id).max() {
                ids.lock().unwrap().advance_past(max_id);
            }
        } else {
            let base = ids.lock().unwrap().base();
            for (i, p) in records.iter_mut().enumerate() {
                p.id = base + i as ParticleId;
            }
            if let Some(max_id) = records.iter().map(|p| p.id).max() {
                ids.lock().unwrap().advance_past(max_id);
            }
        }
        for p in &mut records {
            p.state = StateCode::Evaluate;
        }
        Self::build(fieldset, schema, ids, records, None, Vec::new(), BRACKET_CAPACITY)
    }

    fn build(
        fieldset: Arc<FieldSet>,
        schema: Arc<ParticleSchema>,
        ids: Arc<Mutex<IdentityAllocator>>,
        records: Vec<ParticleRecord>,
        repeat_dt: Option<f64>,
        pid_offsets: Vec<ParticleId>,
        capacity: usize,
    ) -> Result<ParticleSet> {
        let repeat = match repeat_dt {
            Some(interval) => {
                if interval <= 0. {
                    return Err(Error::InvalidArgument("repeat interval must be > 0".to_string()));
                }
                if let Some(first) = records.first() {
                    let t0 = first.time;
                    let uniform = records
                        .iter()
                        .all(|p| p.time == t0 || (p.time.is_nan() && t0.is_nan()));
                    if !uniform {
                        return Err(Error::InvalidArgument(
                            "all particle release times must be equal when repeat_dt is set".to_string(),
                        ));
                    }
                }
                Some(RepeatRelease {
                    interval,
                    start_time: records.first().map(|p| p.time).filter(|t| !t.is_nan()),
                    lon: records.iter().map(|p| p.lon).collect(),
                    lat: records.iter().map(|p| p.lat).collect(),
                    depth: records.iter().map(|p| p.depth).collect(),
                    attrs: records.iter().map(|p| p.attrs.clone()).collect(),
                    pid_offsets,
                })
            }
            None => None,
        };
        Ok(ParticleSet {
            brackets: Self::chunk_records(records, capacity),
            bracket_capacity: capacity,
            fieldset,
            schema,
            ids,
            repeat,
            kernel: None,
            time_origin: 0.,
        })
    }

    /// Re-partition into brackets of at most `capacity` records. Intended for
    /// tests and tuning right after construction.
    pub fn with_bracket_capacity(mut self, capacity: usize) -> Result<ParticleSet> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("bracket capacity must be > 0".to_string()));
        }
        self.bracket_capacity = capacity;
        let records: Vec<ParticleRecord> = self
            .brackets
            .drain(..)
            .flat_map(|b| b.into_records())
            .collect();
        self.brackets = Self::chunk_records(records, capacity);
        Ok(self)
    }

    fn chunk_records(records: Vec<ParticleRecord>, capacity: usize) -> Vec<Bracket> {
        let mut brackets = Vec::new();
        let mut iter = records.into_iter();
        loop {
            let chunk: Vec<ParticleRecord> = iter.by_ref().take(capacity).collect();
            if chunk.is_empty() {
                break;
            }
            brackets.push(Bracket::from_records(chunk));
        }
        brackets
    }

    pub fn size(&self) -> usize {
        self.brackets.iter().map(|b| b.bounds().count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn bracket_capacity(&self) -> usize {
        self.bracket_capacity
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    pub(crate) fn brackets_mut(&mut self) -> &mut [Bracket] {
        &mut self.brackets
    }

    pub fn fieldset(&self) -> &Arc<FieldSet> {
        &self.fieldset
    }

    pub fn schema(&self) -> &ParticleSchema {
        &self.schema
    }

    pub fn time_origin(&self) -> f64 {
        self.time_origin
    }

    pub fn set_time_origin(&mut self, origin: f64) {
        self.time_origin = origin;
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticleRecord> {
        self.brackets.iter().flat_map(|b| b.records().iter())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParticleRecord> {
        self.brackets.iter_mut().flat_map(|b| b.records_mut().iter_mut())
    }

    /// Snapshot of every live record in global-index order.
    pub fn to_records(&self) -> Vec<ParticleRecord> {
        self.iter().cloned().collect()
    }

    pub fn get(&self, index: i64) -> Result<&ParticleRecord> {
        let (bracket, slot) = self.resolve_global_index(index)?;
        Ok(&self.brackets[bracket].records()[slot])
    }

    pub fn get_mut(&mut self, index: i64) -> Result<&mut ParticleRecord> {
        let (bracket, slot) = self.resolve_global_index(index)?;
        Ok(&mut self.brackets[bracket].records_mut()[slot])
    }

    /// Translate a logical global index into a `(bracket, slot)` location.
    ///
    /// Negative indices wrap modulo the current size, python-slice style.
    /// Derived fresh on every call; mutation invalidates cumulative offsets,
    /// so nothing here may be cached.
    pub fn resolve_global_index(&self, index: i64) -> Result<(usize, usize)> {
        let total = self.size() as i64;
        let mut index = index;
        if index < 0 {
            if total == 0 {
                return Err(Error::NotFound("global index into empty particle set".to_string()));
            }
            while index < 0 {
                index += total;
            }
        }
        if index >= total {
            return Err(Error::NotFound(format!("global index {} out of range {}", index, total)));
        }
        let mut remaining = index as usize;
        for (bracket, b) in self.brackets.iter().enumerate() {
            let count = b.bounds().count;
            if remaining < count {
                return Ok((bracket, remaining));
            }
            remaining -= count;
        }
        Err(Error::NotFound(format!("global index {}", index)))
    }

    /// Locate a record by identity: brackets whose id range could contain the
    /// identity are scanned exactly. More than one match means identities were
    /// duplicated upstream and is reported as such.
    pub fn resolve_by_identity(&self, id: ParticleId) -> Result<(usize, usize)> {
        let mut found: Option<(usize, usize)> = None;
        for (bracket, b) in self.brackets.iter().enumerate() {
            if !b.bounds().contains(id) {
                continue;
            }
            for (slot, p) in b.records().iter().enumerate() {
                if p.id == id {
                    if found.is_some() {
                        return Err(Error::AmbiguousIdentity(id));
                    }
                    found = Some((bracket, slot));
                }
            }
        }
        found.ok_or_else(|| Error::NotFound(format!("particle id {}", id)))
    }

    /// Bulk-append another set's brackets onto this one. No re-chunking, no
    /// reallocation of existing brackets.
    pub fn add(&mut self, other: ParticleSet) -> Result<()> {
        if *other.schema != *self.schema {
            return Err(Error::InvalidArgument(
                "cannot add particle sets with different attribute schemas".to_string(),
            ));
        }
        self.brackets.extend(other.brackets);
        Ok(())
    }

    /// Append loose records, split into new capacity-bounded brackets.
    pub fn append_bulk(&mut self, records: Vec<ParticleRecord>) {
        let brackets = Self::chunk_records(records, self.bracket_capacity);
        self.brackets.extend(brackets);
    }

    /// Remove records by global index.
    pub fn remove(&mut self, indices: &[i64]) -> Result<()> {
        self.pop(indices).map(|_| ())
    }

    /// Remove records by global index, returning them in request order.
    pub fn pop(&mut self, indices: &[i64]) -> Result<Vec<ParticleRecord>> {
        let mut resolved = Vec::with_capacity(indices.len());
        for &index in indices {
            resolved.push(self.resolve_global_index(index)?);
        }
        let mut per_bracket: Vec<Vec<usize>> = vec![Vec::new(); self.brackets.len()];
        for &(bracket, slot) in &resolved {
            per_bracket[bracket].push(slot);
        }
        let groups: Vec<(usize, Vec<usize>)> = per_bracket
            .into_iter()
            .enumerate()
            .filter(|(_, slots)| !slots.is_empty())
            .collect();
        let removed = self.remove_grouped(groups)?;
        let by_location: HashMap<(usize, usize), ParticleRecord> = removed.into_iter().collect();
        let mut out = Vec::with_capacity(resolved.len());
        for location in resolved {
            let record = by_location
                .get(&location)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("removed record at {:?}", location)))?;
            out.push(record);
        }
        Ok(out)
    }

    /// Remove one record by identity.
    pub fn pop_by_id(&mut self, id: ParticleId) -> Result<ParticleRecord> {
        let (bracket, slot) = self.resolve_by_identity(id)?;
        let mut removed = self.remove_grouped(vec![(bracket, vec![slot])])?;
        let ((_, _), record) = removed
            .pop()
            .ok_or_else(|| Error::NotFound(format!("particle id {}", id)))?;
        Ok(record)
    }

    /// Per-bracket deletion against the current layout. An emptied bracket is
    /// dropped unless it is the last one, which stays with sentinel bounds.
    /// Finishes with a compaction pass.
    pub(crate) fn remove_grouped(
        &mut self,
        mut groups: Vec<(usize, Vec<usize>)>,
    ) -> Result<Vec<((usize, usize), ParticleRecord)>> {
        for (bracket, slots) in &groups {
            let len = self
                .brackets
                .get(*bracket)
                .map(|b| b.len())
                .ok_or(Error::InvalidIndex {
                    bracket: *bracket,
                    slot: 0,
                })?;
            for &slot in slots {
                if slot >= len {
                    return Err(Error::InvalidIndex {
                        bracket: *bracket,
                        slot,
                    });
                }
            }
        }
        // highest bracket first, so dropping an emptied bracket cannot shift
        // the ones still to be processed
        groups.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = Vec::new();
        for (bracket, slots) in groups {
            let records = self.brackets[bracket].remove_slots(bracket, &slots)?;
            for (slot, record) in slots.into_iter().zip(records) {
                removed.push(((bracket, slot), record));
            }
            if self.brackets[bracket].is_empty() && self.brackets.len() > 1 {
                self.brackets.remove(bracket);
            }
        }
        self.merge_brackets();
        Ok(removed)
    }

    /// Compaction pass: as long as two brackets sit below half capacity, merge
    /// the second into the first and rescan. Bounds the long-run bracket count
    /// to roughly `size / capacity` under sustained deletion churn.
    pub fn merge_brackets(&mut self) {
        loop {
            let mut first: Option<usize> = None;
            let mut second: Option<usize> = None;
            for (i, b) in self.brackets.iter().enumerate() {
                if b.is_undersized(self.bracket_capacity) {
                    if first.is_none() {
                        first = Some(i);
                    } else {
                        second = Some(i);
                        break;
                    }
                }
            }
            match (first, second) {
                (Some(target), Some(source)) => {
                    let src = self.brackets.remove(source);
                    self.brackets[target].absorb(src);
                }
                _ => break,
            }
        }
    }

    /// Instantiate a fresh sub-population from the repeat-release template at
    /// `time`, with `dt` stamped and new identities from the shared allocator.
    pub(crate) fn instantiate_repeat(&self, rep: &RepeatRelease, time: f64, dt: f64) -> Result<ParticleSet> {
        let base = self.ids.lock().unwrap().base();
        let mut records = Vec::with_capacity(rep.lon.len());
        for i in 0..rep.lon.len() {
            let mut p = ParticleRecord::new(
                base + rep.pid_offsets[i],
                rep.lon[i],
                rep.lat[i],
                rep.depth[i],
                time,
                &self.schema,
            );
            p.dt = dt;
            p.attrs = rep.attrs[i].clone();
            records.push(p);
        }
        if let Some(max_id) = records.iter().map(|p| p.id).max() {
            self.ids.lock().unwrap().advance_past(max_id);
        }
        Self::build(
            self.fieldset.clone(),
            self.schema.clone(),
            self.ids.clone(),
            records,
            None,
            Vec::new(),
            self.bracket_capacity,
        )
    }

    /// 2-D particle density over the gridded field's cells, one row per lat
    /// cell. Optionally weighted by a float attribute; `relative` scales by
    /// the total weight.
    pub fn density(&self, weight_attr: Option<&str>, relative: bool) -> Result<Vec<Vec<f64>>> {
        let grid = match self.fieldset.as_ref() {
            FieldSet::GriddedFieldSet(g) => g,
            _ => {
                return Err(Error::InvalidArgument(
                    "density requires a gridded field set".to_string(),
                ))
            }
        };
        let ncols = grid.lon_axis().len() - 1;
        let nrows = grid.lat_axis().len() - 1;
        let slot = weight_attr.map(|name| self.schema.resolve(name)).transpose()?;
        let mut cells = vec![vec![0f64; ncols]; nrows];
        let mut total = 0f64;
        for p in self.iter() {
            let (i, j) = grid
                .locate_cell(p.lon, p.lat)
                .ok_or(Error::OutOfDomain(p.lon as f64, p.lat as f64))?;
            let weight = match slot {
                Some(slot) => p.attrs[slot].as_float() as f64,
                None => 1.,
            };
            cells[j][i] += weight;
            total += weight;
        }
        if relative && total > 0. {
            for row in &mut cells {
                for cell in row {
                    *cell /= total;
                }
            }
        }
        Ok(cells)
    }
}

impl fmt::Display for ParticleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in self.iter() {
            writeln!(f, "{}", p)?;
        }
        Ok(())
    }
}
