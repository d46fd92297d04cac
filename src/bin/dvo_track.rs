// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use std::{env, error::Error, fs, path::Path, path::PathBuf};

use direct_vo::core::camera::Intrinsics;
use direct_vo::core::config::Config;
use direct_vo::core::odometry::{MappingAction, Odometry};
use direct_vo::dataset::tum_rgbd::{self, TrajectoryPose};
use direct_vo::math::se3::Se3;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}

const USAGE: &str = "Usage: ./dvo_track [fr1|fr2|fr3] (associations.txt|rgb.txt) [config.json]

With an associations file, the first depth image initializes the depth map.
With an image list, the depth map is initialized randomly.
The estimated trajectory is printed to stdout in the TUM RGB-D format.";

/// A gray image to track, with its timestamp.
struct Input {
    timestamp: f64,
    image_path: PathBuf,
}

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let valid_args = check_args(args)?;
    let config = match &valid_args.config_path {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    // Read the list of images, and the first depth image if available.
    let list_content = fs::read_to_string(&valid_args.list_file_path)?;
    let list_dir = valid_args
        .list_file_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let (inputs, first_depth_path) = match tum_rgbd::parse::associations(&list_content) {
        Ok(associations) => {
            let first_depth = associations
                .first()
                .map(|assoc| list_dir.join(&assoc.depth_file_path));
            let inputs = associations
                .into_iter()
                .map(|assoc| Input {
                    timestamp: assoc.color_timestamp,
                    image_path: list_dir.join(assoc.color_file_path),
                })
                .collect();
            (inputs, first_depth)
        }
        Err(_) => {
            let inputs: Vec<Input> = tum_rgbd::parse::image_list(&list_content)?
                .into_iter()
                .map(|entry| Input {
                    timestamp: entry.timestamp,
                    image_path: list_dir.join(entry.path),
                })
                .collect();
            (inputs, None)
        }
    };
    let (first, others) = inputs.split_first().ok_or("The image list is empty")?;

    // Initialize the odometry with the first image.
    let img = tum_rgbd::read_gray(&first.image_path)?;
    let (width, height) = img.shape();
    let mut odometry = Odometry::new(&config, &valid_args.intrinsics, width, height)?;
    match first_depth_path {
        Some(depth_path) => {
            info!("Depth initialization from {}", depth_path.display());
            let depth = tum_rgbd::read_depth(&depth_path)?;
            odometry.depth_init(img, &depth)?;
        }
        None => odometry.random_init(img, &mut StdRng::seed_from_u64(0))?,
    }
    print_pose(first.timestamp, &Se3::identity());

    // Track every other frame.
    for input in others {
        let img = tum_rgbd::read_gray(&input.image_path)?;
        let outcome = odometry.track_frame(img)?;
        if outcome.action == MappingAction::Rejected {
            warn!("Frame at {} was rejected", input.timestamp);
        } else {
            print_pose(input.timestamp, &outcome.cam_to_world);
        }
    }
    Ok(())
}

/// Print to stdout the frame pose.
fn print_pose(timestamp: f64, pose: &Se3) {
    println!(
        "{}",
        TrajectoryPose {
            timestamp,
            pose: *pose
        }
    );
}

struct Args {
    list_file_path: PathBuf,
    intrinsics: Intrinsics,
    config_path: Option<PathBuf>,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let (camera_id, list_file_path, config_path) = match args {
        [_, camera_id, list] => (camera_id, PathBuf::from(list), None),
        [_, camera_id, list, config] => (camera_id, PathBuf::from(list), Some(PathBuf::from(config))),
        _ => {
            eprintln!("{}", USAGE);
            return Err("Wrong number of arguments".to_string());
        }
    };
    let intrinsics = tum_rgbd::intrinsics(camera_id).ok_or_else(|| {
        eprintln!("{}", USAGE);
        format!("Unknown camera id: {}", camera_id)
    })?;
    if !list_file_path.is_file() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The image list file does not exist or is not reachable: {}",
            list_file_path.display()
        ));
    }
    Ok(Args {
        list_file_path,
        intrinsics,
        config_path,
    })
}
