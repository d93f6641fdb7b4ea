use crate::error::{Error, Result};
use crate::floating_type_mod::FT;
use enum_dispatch::enum_dispatch;
use std::sync::Mutex;

/// Contract of the background field collaborator.
///
/// The stepping loop only ever calls `time_range` (to derive a default end
/// time) and `compute_time_chunk` (to make input data resident); `velocity`
/// is sampled by the advection kernels. Interpolation fidelity beyond the
/// implementations below is out of scope.
#[enum_dispatch]
pub trait FieldSetTrait {
    /// Full time span covered by the input data.
    fn time_range(&self) -> (f64, f64);

    /// Ensure data covering `time` in the direction of `dt` is resident and
    /// return the time of the next chunk boundary in that direction (infinite
    /// when everything is already resident). Failure is fatal for the run.
    fn compute_time_chunk(&self, time: f64, dt: f64) -> Result<f64>;

    /// Sample the velocity components (u, v, w) at a particle position.
    fn velocity(&self, time: f64, depth: FT, lat: FT, lon: FT) -> Result<[FT; 3]>;

    /// Shallowest depth of the domain, used as the default release depth.
    fn min_depth(&self) -> FT {
        0 as FT
    }
}

/// Constant velocity everywhere, unbounded in time. Mostly useful for tests
/// and analytic scenarios.
#[derive(Debug, Clone, Copy)]
pub struct UniformFieldSet {
    u: FT,
    v: FT,
    w: FT,
}

impl UniformFieldSet {
    pub fn new(u: FT, v: FT, w: FT) -> UniformFieldSet {
        UniformFieldSet { u, v, w }
    }
}

impl FieldSetTrait for UniformFieldSet {
    fn time_range(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn compute_time_chunk(&self, time: f64, dt: f64) -> Result<f64> {
        Ok(if dt > 0. {
            f64::INFINITY
        } else if dt < 0. {
            f64::NEG_INFINITY
        } else {
            time
        })
    }

    fn velocity(&self, _time: f64, _depth: FT, _lat: FT, _lon: FT) -> Result<[FT; 3]> {
        Ok([self.u, self.v, self.w])
    }
}

/// Velocity data on a regular lon/lat grid with a time axis, loaded in chunks
/// of `chunk_len` consecutive time slices.
///
/// Data layout is time-major: `u[t * nlat * nlon + j * nlon + i]`. Sampling is
/// bilinear in lon/lat and linear in time; the vertical component is zero.
/// The resident window is tracked behind a mutex so sampling can run from the
/// parallel kernel span.
#[derive(Debug)]
pub struct GriddedFieldSet {
    lon: Vec<FT>,
    lat: Vec<FT>,
    time: Vec<f64>,
    u: Vec<FT>,
    v: Vec<FT>,
    chunk_len: usize,
    /// Half-open range of resident time-slice indices.
    resident: Mutex<(usize, usize)>,
}

impl GriddedFieldSet {
    pub fn new(
        lon: Vec<FT>,
        lat: Vec<FT>,
        time: Vec<f64>,
        u: Vec<FT>,
        v: Vec<FT>,
        chunk_len: usize,
    ) -> Result<GriddedFieldSet> {
        if lon.len() < 2 || lat.len() < 2 || time.len() < 2 {
            return Err(Error::InvalidArgument(
                "gridded field needs at least two samples per axis".to_string(),
            ));
        }
        if chunk_len < 2 {
            return Err(Error::InvalidArgument(
                "time chunk length must cover at least two slices".to_string(),
            ));
        }
        let expected = lon.len() * lat.len() * time.len();
        if u.len() != expected || v.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "field data length {} does not match grid size {}",
                u.len(),
                expected
            )));
        }
        Ok(GriddedFieldSet {
            lon,
            lat,
            time,
            u,
            v,
            chunk_len,
            resident: Mutex::new((0, 0)),
        })
    }

    pub fn lon_axis(&self) -> &[FT] {
        &self.lon
    }

    pub fn lat_axis(&self) -> &[FT] {
        &self.lat
    }

    /// Grid cell `(i, j)` containing the position, or `None` outside the grid.
    pub fn locate_cell(&self, lon: FT, lat: FT) -> Option<(usize, usize)> {
        Some((Self::cell_index(&self.lon, lon)?, Self::cell_index(&self.lat, lat)?))
    }

    /// Index of the axis cell containing `x`, i.e. `axis[i] <= x <= axis[i+1]`.
    fn cell_index(axis: &[FT], x: FT) -> Option<usize> {
        if x < axis[0] || x > axis[axis.len() - 1] {
            return None;
        }
        let mut i = 0;
        while i + 2 < axis.len() && x >= axis[i + 1] {
            i += 1;
        }
        Some(i)
    }

    fn slice_index(&self, time: f64) -> Option<usize> {
        let last = self.time.len() - 1;
        if time < self.time[0] || time > self.time[last] {
            return None;
        }
        let mut t = 0;
        while t + 2 < self.time.len() && time >= self.time[t + 1] {
            t += 1;
        }
        Some(t)
    }

    fn sample_slice(&self, data: &[FT], t: usize, j: usize, i: usize, eta: FT, xsi: FT) -> FT {
        let nlon = self.lon.len();
        let base = t * self.lat.len() * nlon;
        let q00 = data[base + j * nlon + i];
        let q01 = data[base + j * nlon + i + 1];
        let q10 = data[base + (j + 1) * nlon + i];
        let q11 = data[base + (j + 1) * nlon + i + 1];
        (1. as FT - eta) * ((1. as FT - xsi) * q00 + xsi * q01) + eta * ((1. as FT - xsi) * q10 + xsi * q11)
    }
}

impl FieldSetTrait for GriddedFieldSet {
    fn time_range(&self) -> (f64, f64) {
        (self.time[0], self.time[self.time.len() - 1])
    }

    fn compute_time_chunk(&self, time: f64, dt: f64) -> Result<f64> {
        let mut t = self.slice_index(time).ok_or(Error::InputUnavailable(time))?;
        let n = self.time.len();
        let mut resident = self.resident.lock().unwrap();
        if dt >= 0. {
            let hi = (t + self.chunk_len).min(n);
            *resident = (t, hi);
            // the next stop is the last resident slice, so samples up to the
            // boundary time stay inside the window
            Ok(if hi < n { self.time[hi - 1] } else { f64::INFINITY })
        } else {
            // stepping down from exactly a slice time needs the slices below it
            if t > 0 && time <= self.time[t] {
                t -= 1;
            }
            let lo = (t + 2).saturating_sub(self.chunk_len);
            *resident = (lo, t + 2);
            Ok(if lo > 0 { self.time[lo] } else { f64::NEG_INFINITY })
        }
    }

    fn velocity(&self, time: f64, _depth: FT, lat: FT, lon: FT) -> Result<[FT; 3]> {
        let t = self.slice_index(time).ok_or(Error::InputUnavailable(time))?;
        let tau = ((time - self.time[t]) / (self.time[t + 1] - self.time[t])) as FT;
        {
            // only the slices the interpolation actually touches must be resident
            let resident = self.resident.lock().unwrap();
            let lo_needed = if tau >= 1. { t + 1 } else { t };
            let hi_needed = if tau <= 0. { t + 1 } else { t + 2 };
            if lo_needed < resident.0 || hi_needed > resident.1 {
                return Err(Error::InputUnavailable(time));
            }
        }
        let i = Self::cell_index(&self.lon, lon).ok_or(Error::OutOfDomain(lon as f64, lat as f64))?;
        let j = Self::cell_index(&self.lat, lat).ok_or(Error::OutOfDomain(lon as f64, lat as f64))?;
        let xsi = (lon - self.lon[i]) / (self.lon[i + 1] - self.lon[i]);
        let eta = (lat - self.lat[j]) / (self.lat[j + 1] - self.lat[j]);

        let u0 = self.sample_slice(&self.u, t, j, i, eta, xsi);
        let u1 = self.sample_slice(&self.u, t + 1, j, i, eta, xsi);
        let v0 = self.sample_slice(&self.v, t, j, i, eta, xsi);
        let v1 = self.sample_slice(&self.v, t + 1, j, i, eta, xsi);

        Ok([
            (1. as FT - tau) * u0 + tau * u1,
            (1. as FT - tau) * v0 + tau * v1,
            0 as FT,
        ])
    }
}

/// The field collaborators known to this crate.
#[enum_dispatch(FieldSetTrait)]
#[derive(Debug)]
pub enum FieldSet {
    UniformFieldSet(UniformFieldSet),
    GriddedFieldSet(GriddedFieldSet),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_grid(value: FT) -> GriddedFieldSet {
        // 3 lon x 2 lat x 4 time slices of constant u, zero v
        let lon = vec![0., 1., 2.];
        let lat = vec![0., 1.];
        let time = vec![0., 10., 20., 30.];
        let n = lon.len() * lat.len() * time.len();
        GriddedFieldSet::new(lon, lat, time, vec![value; n], vec![0 as FT; n], 2).unwrap()
    }

    #[test]
    fn uniform_field_is_unbounded() -> Result<()> {
        let field = UniformFieldSet::new(1., 2., 0.);
        assert_eq!(field.time_range(), (f64::NEG_INFINITY, f64::INFINITY));
        assert_eq!(field.compute_time_chunk(0., 1.)?, f64::INFINITY);
        assert_eq!(field.compute_time_chunk(0., -1.)?, f64::NEG_INFINITY);
        assert_eq!(field.velocity(5., 0., 0., 0.)?, [1., 2., 0.]);
        Ok(())
    }

    #[test]
    fn gridded_sampling_interpolates() -> Result<()> {
        let lon = vec![0., 1.];
        let lat = vec![0., 1.];
        let time = vec![0., 10.];
        // u varies linearly with lon: 0 at lon=0, 2 at lon=1, constant in time
        let u = vec![0., 2., 0., 2., 0., 2., 0., 2.];
        let v = vec![0 as FT; 8];
        let field = GriddedFieldSet::new(lon, lat, time, u, v, 2)?;
        field.compute_time_chunk(0., 1.)?;
        let [u, v, w] = field.velocity(5., 0., 0.5, 0.5)?;
        assert!((u - 1.).abs() < 1e-5);
        assert_eq!(v, 0.);
        assert_eq!(w, 0.);
        Ok(())
    }

    #[test]
    fn gridded_chunk_advance_reports_boundary() -> Result<()> {
        let field = constant_grid(1.);
        // forward from t=0 with chunk_len=2: slices [0, 2) resident, next stop
        // at the last resident slice time[1]=10
        assert_eq!(field.compute_time_chunk(0., 1.)?, 10.);
        assert!(field.velocity(5., 0., 0.5, 0.5).is_ok());
        // the boundary time itself is still resident
        assert!(field.velocity(10., 0., 0.5, 0.5).is_ok());
        // beyond the resident window
        assert!(field.velocity(25., 0., 0.5, 0.5).is_err());
        // advancing makes it available
        assert_eq!(field.compute_time_chunk(25., 1.)?, f64::INFINITY);
        assert!(field.velocity(25., 0., 0.5, 0.5).is_ok());
        Ok(())
    }

    #[test]
    fn gridded_chunk_advance_runs_backward() -> Result<()> {
        let field = constant_grid(1.);
        // backward from the end: slices [2, 4) resident, next stop at time[2]=20
        assert_eq!(field.compute_time_chunk(30., -1.)?, 20.);
        assert!(field.velocity(25., 0., 0.5, 0.5).is_ok());
        assert!(field.velocity(20., 0., 0.5, 0.5).is_ok());
        assert!(field.velocity(15., 0., 0.5, 0.5).is_err());
        // re-chunking at the boundary exposes the slices below it
        assert_eq!(field.compute_time_chunk(20., -1.)?, 10.);
        assert!(field.velocity(15., 0., 0.5, 0.5).is_ok());
        assert_eq!(field.compute_time_chunk(10., -1.)?, f64::NEG_INFINITY);
        assert!(field.velocity(5., 0., 0.5, 0.5).is_ok());
        Ok(())
    }

    #[test]
    fn out_of_domain_and_out_of_time_are_errors() -> Result<()> {
        let field = constant_grid(1.);
        field.compute_time_chunk(0., 1.)?;
        assert!(matches!(field.velocity(5., 0., 0.5, 9.), Err(Error::OutOfDomain(..))));
        assert!(matches!(field.compute_time_chunk(99., 1.), Err(Error::InputUnavailable(_))));
        Ok(())
    }
}
