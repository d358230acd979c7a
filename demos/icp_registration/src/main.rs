use argh::FromArgs;
use std::path::PathBuf;

use cloudreg_3d::io::xyz;
use cloudreg_icp as creg;

#[derive(FromArgs)]
/// Register a source point cloud onto a target point cloud with ICP
struct Args {
    /// path to the source point cloud (.xyz)
    #[argh(option)]
    source_path: PathBuf,

    /// path to the target point cloud (.xyz)
    #[argh(option)]
    target_path: PathBuf,

    /// path to a JSON file with the ICP configuration
    #[argh(option)]
    config_path: Option<PathBuf>,

    /// maximum number of iterations, overrides the configuration
    #[argh(option)]
    max_iterations: Option<usize>,

    /// convergence tolerance on the RMSE change, overrides the configuration
    #[argh(option)]
    tolerance: Option<f64>,

    /// where to write the aligned source cloud (.xyz)
    #[argh(option)]
    output_path: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config_path {
        Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => creg::ICPConfig::default(),
    };
    if let Some(max_iterations) = args.max_iterations {
        config.criteria.max_iterations = max_iterations;
    }
    if let Some(tolerance) = args.tolerance {
        config.criteria.tolerance = tolerance;
    }
    log::debug!("config: {}", serde_json::to_string(&config)?);

    let source_cloud = xyz::read_xyz(&args.source_path)?;
    println!("Source cloud: #{} points", source_cloud.len());

    let target_cloud = xyz::read_xyz(&args.target_path)?;
    println!("Target cloud: #{} points", target_cloud.len());

    let result = creg::icp_vanilla(&source_cloud, &target_cloud, &config)?;

    println!(
        "ICP {:?} after {} iterations, rmse: {}",
        result.status, result.num_iterations, result.rmse
    );
    for row in result.transform.matrix() {
        println!("{:>12.6} {:>12.6} {:>12.6} {:>12.6}", row[0], row[1], row[2], row[3]);
    }

    if let Some(output_path) = &args.output_path {
        xyz::write_xyz(output_path, &result.aligned)?;
        println!("Aligned cloud written to {}", output_path.display());
    }

    Ok(())
}
