//! Synthetic sailing run through the fusion core.
//!
//! Sails straight north, then turns at a fixed rate, then holds the new course.
//! GPS arrives at 1 Hz with bounded pseudo-noise, IMU at 50 Hz, predict ticks at 5 Hz.
//! Prints one line per second, as text or JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use sail_tracker_rs::angles::heading_rad_to_degrees;
use sail_tracker_rs::geodesy::to_geo;
use sail_tracker_rs::{
    FusionEvent, FusionSnapshot, GeoPoint, GpsFix, ImuSample, LocalPoint, RotationRate,
    SailingCase, SensorFusion, TrackerConfig, Vec3,
};

const IMU_HZ: u32 = 50;
const TICK_EVERY: u32 = 10;
const GPS_EVERY: u32 = 50;

#[derive(Parser, Debug)]
#[command(name = "sail_sim")]
#[command(about = "Deterministic GPS/IMU sailing simulation", long_about = None)]
struct Args {
    /// Run length in seconds
    #[arg(long, default_value = "120")]
    duration: f64,

    /// Boat speed through the run (m/s)
    #[arg(long, default_value = "5.0")]
    speed: f64,

    /// Time the turn starts (s)
    #[arg(long, default_value = "60")]
    turn_at: f64,

    /// Turn rate (deg/s)
    #[arg(long, default_value = "3.0")]
    turn_rate: f64,

    /// Turn duration (s)
    #[arg(long, default_value = "30")]
    turn_secs: f64,

    /// GPS position noise half-width (m)
    #[arg(long, default_value = "3.0")]
    gps_noise: f64,

    /// Hull length override (m)
    #[arg(long)]
    hull_length: Option<f64>,

    /// Fuse IMU yaw rate into heading
    #[arg(long)]
    imu: bool,

    /// Emit JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// JSON tracker config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Noise seed
    #[arg(long, default_value = "7")]
    seed: u64,
}

/// Uniform noise in [-1, 1).
fn unit_noise(rng: &mut StdRng) -> f64 {
    rng.gen_range(-1.0..1.0)
}

#[derive(Serialize)]
struct SimLine<'a> {
    timestamp: f64,
    truth_heading_deg: f64,
    truth_position: LocalPoint,
    snapshot: &'a FusionSnapshot,
}

struct Truth {
    position: LocalPoint,
    heading_rad: f64,
}

fn turn_rate_at(args: &Args, t: f64) -> f64 {
    if t >= args.turn_at && t < args.turn_at + args.turn_secs {
        args.turn_rate.to_radians()
    } else {
        0.0
    }
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            TrackerConfig::from_json_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TrackerConfig::default(),
    };
    if let Some(hull) = args.hull_length {
        config.hull_length_m = hull;
    }
    if args.imu {
        config.imu_enabled = true;
    }
    config.sanitize()?;
    Ok(config)
}

fn print_text(t: f64, truth: &Truth, snapshot: &FusionSnapshot) {
    let Some(k) = &snapshot.kalman else {
        println!("t={t:6.1}s  (no fix)");
        return;
    };
    let sigma = snapshot
        .position_covariance
        .map(|c| (c.trace() / 2.0).max(0.0).sqrt())
        .unwrap_or(f64::NAN);
    let upwind = snapshot
        .performance
        .as_ref()
        .and_then(|p| p.case(SailingCase::UpwindLeft).improvement_percent);
    println!(
        "t={:6.1}s  pos=({:.6}, {:.6})  v={:.2} m/s  hdg={:6.1}° (truth {:6.1}°)  σ={:.2} m  upwind={}",
        t,
        k.position.lat,
        k.position.lon,
        k.speed,
        heading_rad_to_degrees(k.heading_rad),
        heading_rad_to_degrees(truth.heading_rad),
        sigma,
        upwind.map_or_else(|| "-".to_string(), |u| format!("{u:+.1}%")),
    );
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let mut fusion = SensorFusion::new(config);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let origin = GeoPoint::new(37.8, -122.4);
    let mut truth = Truth { position: LocalPoint::default(), heading_rad: 0.0 };
    let dt = 1.0 / IMU_HZ as f64;
    let steps = (args.duration.max(0.0) * IMU_HZ as f64).round() as u32;

    for step in 0..=steps {
        let t = step as f64 * dt;

        let yaw_rate = turn_rate_at(&args, t);
        let gyro_noise = 0.2 * unit_noise(&mut rng);
        let imu = ImuSample {
            timestamp: t,
            // Flat device: yaw is minus the z rate.
            rotation_rate: Some(RotationRate::new(
                0.1 * unit_noise(&mut rng),
                0.1 * unit_noise(&mut rng),
                -yaw_rate.to_degrees() + gyro_noise,
            )),
            acceleration_including_gravity: Some(Vec3::new(
                0.05 * unit_noise(&mut rng),
                0.05 * unit_noise(&mut rng),
                9.81,
            )),
            linear_acceleration: None,
        };
        fusion.feed_imu(&imu);

        if step % TICK_EVERY == 0 {
            fusion.tick(t);
        }
        if step % GPS_EVERY == 0 {
            let measured = LocalPoint::new(
                truth.position.x + args.gps_noise * unit_noise(&mut rng),
                truth.position.y + args.gps_noise * unit_noise(&mut rng),
            );
            let point = to_geo(measured, origin);
            let fix = GpsFix {
                timestamp: t,
                latitude: point.lat,
                longitude: point.lon,
                accuracy: args.gps_noise.max(1.0) * 2.0,
                speed: Some(args.speed + 0.1 * unit_noise(&mut rng)),
                course_deg: Some(heading_rad_to_degrees(truth.heading_rad) + unit_noise(&mut rng)),
            };
            for event in fusion.feed_gps(&fix) {
                match event {
                    FusionEvent::PerformanceUpdated(_) => {}
                    other => log::debug!("t={t:.1} {other:?}"),
                }
            }

            let snapshot = fusion.snapshot();
            if args.json {
                let line = SimLine {
                    timestamp: t,
                    truth_heading_deg: heading_rad_to_degrees(truth.heading_rad),
                    truth_position: truth.position,
                    snapshot: &snapshot,
                };
                println!("{}", serde_json::to_string(&line)?);
            } else {
                print_text(t, &truth, &snapshot);
            }
        }

        truth.heading_rad += yaw_rate * dt;
        truth.position.x += args.speed * truth.heading_rad.sin() * dt;
        truth.position.y += args.speed * truth.heading_rad.cos() * dt;
    }

    Ok(())
}
