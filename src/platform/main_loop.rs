use std::sync::{Arc, Mutex};

use clap::{App, AppSettings, Arg, SubCommand};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    fieldset::{FieldSet, UniformFieldSet},
    floating_type_mod::FT,
    identity::IdentityAllocator,
    kernel::{AdvectionEE, AdvectionNone, AdvectionRK4, Kernel},
    particle::ParticleSchema,
    particle_set::{ParticleSet, ReleaseTimes},
    ExecuteOptions,
};

use super::vtk_writer::VtkParticleWriter;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelChoice {
    AdvectionNone,
    AdvectionEE,
    AdvectionRK4,
}

impl From<KernelChoice> for Kernel {
    fn from(choice: KernelChoice) -> Kernel {
        match choice {
            KernelChoice::AdvectionNone => Kernel::from(AdvectionNone),
            KernelChoice::AdvectionEE => Kernel::from(AdvectionEE),
            KernelChoice::AdvectionRK4 => Kernel::from(AdvectionRK4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldChoice {
    Uniform { u: FT, v: FT, w: FT },
}

/// YAML-configured demo scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub field: FieldChoice,
    pub kernel: KernelChoice,
    pub lon: Vec<FT>,
    pub lat: Vec<FT>,
    pub depth: Option<Vec<FT>>,
    pub release_time: Option<f64>,
    pub dt: f64,
    pub runtime: Option<f64>,
    pub endtime: Option<f64>,
    pub output_dt: Option<f64>,
    pub repeat_dt: Option<f64>,
}

pub fn start() {
    let matches = App::new("Ocean Drift Simulation")
        .version(CARGO_PKG_VERSION)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("run")
                .about("Run a drift scenario")
                .arg(
                    Arg::with_name("SCENARIO")
                        .help("YAML scenario file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("OUTPUT_DIR")
                        .long("output-dir")
                        .short("o")
                        .takes_value(true)
                        .help("Write VTK snapshots into this directory"),
                )
                .arg(
                    Arg::with_name("VERBOSE")
                        .long("verbose")
                        .short("v")
                        .takes_value(false)
                        .help("Print per-iteration progress"),
                ),
        )
        .get_matches();

    if let Some(run_matches) = matches.subcommand_matches("run") {
        let scenario_file = run_matches.value_of("SCENARIO").expect("missing scenario file");
        let scenario_yaml = std::fs::read_to_string(scenario_file).expect("failed reading scenario file");
        let scenario: Scenario = serde_yaml::from_str(&scenario_yaml).expect("failed parsing scenario file");
        println!("{:?}", scenario);

        let output_dir = run_matches.value_of("OUTPUT_DIR").map(String::from);
        let verbose = run_matches.is_present("VERBOSE");

        if let Err(err) = run_scenario(&scenario, output_dir.as_deref(), verbose) {
            eprintln!("simulation failed: {}", err);
            std::process::exit(1);
        }
    } else {
        unreachable!()
    }
}

pub fn run_scenario(scenario: &Scenario, output_dir: Option<&str>, verbose: bool) -> Result<()> {
    let fieldset = Arc::new(match scenario.field {
        FieldChoice::Uniform { u, v, w } => FieldSet::UniformFieldSet(UniformFieldSet::new(u, v, w)),
    });
    let ids = Arc::new(Mutex::new(IdentityAllocator::new()));
    let time = match scenario.release_time {
        Some(t) => ReleaseTimes::Scalar(t),
        None => ReleaseTimes::Unset,
    };
    let mut pset = ParticleSet::new(
        fieldset,
        Arc::new(ParticleSchema::new()),
        ids,
        &scenario.lon,
        &scenario.lat,
        scenario.depth.as_deref(),
        time,
        scenario.repeat_dt,
        &[],
    )?;

    let mut writer = match (output_dir, scenario.output_dt) {
        (Some(dir), Some(output_dt)) => Some(VtkParticleWriter::new(dir, "drift", output_dt)?),
        _ => None,
    };

    let mut options = ExecuteOptions::new(scenario.dt).verbose(verbose);
    if let Some(writer) = writer.as_mut() {
        options = options.with_output(writer);
    }
    if let Some(runtime) = scenario.runtime {
        options = options.with_runtime(runtime);
    }
    if let Some(endtime) = scenario.endtime {
        options = options.with_endtime(endtime);
    }

    pset.execute(scenario.kernel.into(), options)?;

    println!("finished with {} particles", pset.size());
    Ok(())
}
