use argh::FromArgs;
use std::path::PathBuf;

use glam::DVec3;
use pcreg::compute::Device;
use pcreg::icp::{self, IcpConfig, PointGrid, Registration};
use pcreg::linalg::transforms::axis_angle_to_quaternion;

#[derive(FromArgs)]
/// Registers a moving point grid onto a fixed one
struct Args {
    /// path to the fixed grid, raw little-endian f32 with 8 floats per point
    #[argh(option)]
    fixed_path: Option<PathBuf>,

    /// path to the moving grid, same layout as the fixed grid
    #[argh(option)]
    moving_path: Option<PathBuf>,

    /// grid width
    #[argh(option, default = "640")]
    width: usize,

    /// grid height
    #[argh(option, default = "480")]
    height: usize,

    /// path to a JSON configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// rotation of the synthetic moving grid in degrees, about (1, 1, 1)
    #[argh(option, default = "10.0")]
    angle: f64,

    /// translation of the synthetic moving grid along x
    #[argh(option, default = "5.0")]
    shift: f64,

    /// weight of the color term in the correspondence search, overrides the configuration
    #[argh(option)]
    alpha: Option<f32>,

    /// work-group size of the compute device
    #[argh(option, default = "256")]
    work_group_size: usize,

    /// write the aligned moving grid to this path
    #[argh(option)]
    output_path: Option<PathBuf>,

    /// print the result as JSON
    #[argh(switch)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => IcpConfig::from_file(path)?,
        None => IcpConfig::default(),
    };
    if let Some(alpha) = args.alpha {
        config.index_scale_alpha = alpha;
    }
    log::info!("color weight alpha = {}", config.index_scale_alpha);

    let (fixed, moving) = match (&args.fixed_path, &args.moving_path) {
        (Some(fixed), Some(moving)) => (
            PointGrid::read_raw(fixed, args.width, args.height)?,
            PointGrid::read_raw(moving, args.width, args.height)?,
        ),
        (None, None) => {
            let fixed = icp::synthetic::surface(args.width, args.height);
            let rotation = axis_angle_to_quaternion(DVec3::ONE, args.angle);
            let moving = icp::synthetic::displaced(&fixed, rotation, DVec3::new(args.shift, 0.0, 0.0));
            (fixed, moving)
        }
        _ => return Err("both --fixed-path and --moving-path are needed".into()),
    };
    println!("Fixed grid: #{} points", fixed.len());
    println!("Moving grid: #{} points", moving.len());

    let device = Device::cpu().with_work_group_size(args.work_group_size)?;
    log::info!("using {device}");

    let mut session = Registration::new(config, device, args.width, args.height)?;
    session.load_fixed(&fixed)?;
    session.load_moving(&moving)?;
    let result = session.run()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }

    if let Some(path) = &args.output_path {
        let aligned = PointGrid::new(args.width, args.height, session.aligned_cloud()?)?;
        aligned.write_raw(path)?;
        println!("Aligned grid written to {}", path.display());
    }

    Ok(())
}
