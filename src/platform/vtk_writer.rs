use std::{
    fs::{create_dir_all, File},
    io::Write,
    path::PathBuf,
};

use vtkio::model::*;

use crate::error::{Error, Result};
use crate::floating_type_mod::FT;
use crate::output::ParticleWriter;
use crate::particle::AttrKind;
use crate::particle_set::ParticleSet;

/// Snapshot writer producing one VTK polydata file per output event plus a
/// `.vtk.series` index, e.g. `./data/drift-00001.vtk` and
/// `./data/drift.vtk.series`.
pub struct VtkParticleWriter {
    folder: PathBuf,
    basename: String,
    snapshot_number: usize,
    series_file: File,
    output_dt: f64,
}

impl VtkParticleWriter {
    pub fn new(folder: impl Into<PathBuf>, basename: impl Into<String>, output_dt: f64) -> Result<VtkParticleWriter> {
        let folder: PathBuf = folder.into();
        let basename: String = basename.into();

        create_dir_all(&folder)?;

        let mut series_file = File::create(folder.join(format!("{}.vtk.series", basename)))?;
        series_file.write_all(b"{\n\"file-series-version\": \"1.0\",\n\"files\": [")?;

        Ok(VtkParticleWriter {
            folder,
            basename,
            snapshot_number: 1,
            series_file,
            output_dt,
        })
    }

    fn write_vtk_file(path: PathBuf, particles: &ParticleSet) -> Result<()> {
        let num_particles = particles.size();

        let mut points: Vec<FT> = Vec::with_capacity(3 * num_particles);
        let mut ids: Vec<u64> = Vec::with_capacity(num_particles);
        let mut times: Vec<f64> = Vec::with_capacity(num_particles);
        for p in particles.iter() {
            points.extend([p.lon, p.lat, p.depth]);
            ids.push(p.id);
            times.push(p.time);
        }

        let mut data_arrays: Vec<DataArray> = Vec::new();

        let mut id_array = DataArray::scalars("id", 1);
        id_array.data = IOBuffer::U64(ids);
        data_arrays.push(id_array);

        let mut time_array = DataArray::scalars("time", 1);
        time_array.data = times.into();
        data_arrays.push(time_array);

        for (slot, def) in particles.schema().defs().iter().enumerate() {
            let mut data_array = DataArray::scalars(def.name.clone(), 1);
            data_array.data = match def.kind {
                AttrKind::Float => {
                    let values: Vec<FT> = particles.iter().map(|p| p.attrs[slot].as_float()).collect();
                    values.into()
                }
                AttrKind::Int => {
                    let values: Vec<i64> = particles
                        .iter()
                        .map(|p| match p.attrs[slot] {
                            crate::particle::AttrValue::Int(x) => x,
                            crate::particle::AttrValue::Float(x) => x as i64,
                        })
                        .collect();
                    IOBuffer::I64(values)
                }
            };
            data_arrays.push(data_array);
        }

        let vtk_verts: Vec<u32> = (0..num_particles).flat_map(|i| [1, i as u32]).collect();

        let vtk = Vtk {
            version: Version::new((4, 2)),
            byte_order: ByteOrder::BigEndian,
            title: String::from("Drift particles 1.0"),
            file_path: Some(path.clone()),
            data: DataSet::PolyData {
                meta: None,
                pieces: vec![Piece::Inline(Box::new(PolyDataPiece {
                    points: points.into(),
                    verts: VertexNumbers::Legacy {
                        num_cells: num_particles as u32,
                        vertices: vtk_verts,
                    }
                    .into(),
                    data: Attributes {
                        cell: Vec::new(),
                        point: data_arrays.into_iter().map(Attribute::DataArray).collect(),
                    },
                    ..Default::default()
                }))],
            },
        };
        vtk.export(path).map_err(|e| Error::Output(e.to_string()))
    }
}

impl ParticleWriter for VtkParticleWriter {
    fn output_interval(&self) -> f64 {
        self.output_dt
    }

    fn write(&mut self, particles: &ParticleSet, time: f64) -> Result<()> {
        if self.snapshot_number > 1 {
            self.series_file.write_all(b",")?;
        }

        let vtk_filename = format!("{}-{:05}.vtk", self.basename, self.snapshot_number);
        Self::write_vtk_file(self.folder.join(&vtk_filename), particles)?;

        write!(
            self.series_file,
            "\n{{ \"name\": \"{}\", \"time\": {} }}",
            vtk_filename, time
        )?;

        self.snapshot_number += 1;
        Ok(())
    }
}

impl Drop for VtkParticleWriter {
    fn drop(&mut self) {
        let _ = self.series_file.write_all(b"\n]\n}");
    }
}
