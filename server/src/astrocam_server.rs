// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::join;
use image::{DynamicImage, GrayImage, Luma};
use log::{error, info, warn};
use pico_args::Arguments;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};
use tracing_appender::{non_blocking::NonBlockingBuilder};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use astrocam_elements::camera_trait::ImagingDevice;
use astrocam_elements::image_camera::ImageCamera;
use astrocam_elements::solver_trait::PlateSolverTrait;
use astrocam_elements::star_names::StarNames;

use crate::annotator::{Annotator, load_font};
use crate::capture_engine::{CaptureEngine, CaptureSettings};
use crate::controls::{control_table, initial_controls, safe_set_controls};
use crate::fixture_pool::FixturePool;
use crate::http_server::{AppState, create_router};
use crate::position_reporter::{AlpacaPointing, TelescopePosition, create_alpaca_server};
use crate::shared_state::SharedState;
use crate::solve_engine::{SolveEngine, SolveSettings};

const MAX_DISTORTION: f64 = 0.2;

// Size of the placeholder frame used when there is no device or test image.
const PLACEHOLDER_WIDTH: u32 = 1456;
const PLACEHOLDER_HEIGHT: u32 = 1088;

// Command line arguments for server_main().
#[derive(Debug)]
struct AppArgs {
    port: u16,
    alpaca_port: u16,
    static_dir: String,
    test_image: Option<String>,
    fixtures_dir: String,
    distortion: f64,
    solve_timeout: Option<Duration>,
    star_names: Option<String>,
    label_font: Option<String>,
    fps_interval: Duration,
    solve_rate_interval: Duration,
    log_dir: String,
    log_file: String,
}

fn parse_duration(arg: &str) -> Result<Duration, String> {
    let seconds: f64 = arg.parse().map_err(|e| format!("{}: {:?}", arg, e))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("{}: must be a positive number of seconds", arg));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn parse_args(pargs: &mut Arguments) -> Result<AppArgs, pico_args::Error> {
    Ok(AppArgs {
        port: pargs.value_from_str("--port").unwrap_or(8080),
        alpaca_port: pargs.value_from_str("--alpaca_port").unwrap_or(11111),
        static_dir: pargs.value_from_str("--static_dir")
            .unwrap_or("./static".to_string()),
        test_image: pargs.opt_value_from_str("--test_image")?,
        fixtures_dir: pargs.value_from_str("--fixtures_dir")
            .unwrap_or("./test_images".to_string()),
        distortion: pargs.opt_value_from_str("--distortion")?.unwrap_or(0.0),
        solve_timeout: pargs.opt_value_from_fn("--solve_timeout", parse_duration)?,
        star_names: pargs.opt_value_from_str("--star_names")?,
        label_font: pargs.opt_value_from_str("--label_font")?,
        fps_interval: pargs.opt_value_from_fn("--fps_interval", parse_duration)?
            .unwrap_or(Duration::from_secs(1)),
        solve_rate_interval: pargs.opt_value_from_fn("--solve_rate_interval",
                                                     parse_duration)?
            .unwrap_or(Duration::from_secs(10)),
        log_dir: pargs.value_from_str("--log_dir").unwrap_or(".".to_string()),
        log_file: pargs.value_from_str("--log_file")
            .unwrap_or("astrocam_log.txt".to_string()),
    })
}

// `get_dependencies` Is called to obtain the plate solver and, optionally, a
//     hardware imaging device. It is called after logging has been set up and
//     `server_main()`s command line arguments have been consumed; it receives
//     the remaining arguments.
pub fn server_main(
    product_name: &str, copyright: &str,
    get_dependencies: fn(Arguments)
                         -> (Arc<tokio::sync::Mutex<dyn PlateSolverTrait + Send + Sync>>,
                             Option<Box<dyn ImagingDevice + Send>>)) {
    const HELP: &str = "\
    FLAGS:
      -h, --help                     Prints help information

    OPTIONS:
      --port NUMBER                  8080
      --alpaca_port NUMBER           11111
      --static_dir <path>            ./static
      --test_image <path>
      --fixtures_dir <path>          ./test_images
      --distortion NUMBER            0.0
      --solve_timeout SECONDS
      --star_names <path>
      --label_font <path>
      --fps_interval SECONDS         1.0
      --solve_rate_interval SECONDS  10.0
      --solver_command <path>        astrocam-solve
      --solver_arg <arg>             (repeatable)
      --log_dir <path>               .
      --log_file <file>              astrocam_log.txt
    ";

    let mut pargs = Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        println!("{}", HELP);
        std::process::exit(0);
    }
    let args = match parse_args(&mut pargs) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Invalid arguments: {}\n{}", e, HELP);
            std::process::exit(1);
        }
    };

    // Set up logging.
    let file_appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&args.log_file)
        .max_log_files(10)
        .build(&args.log_dir)
    {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Could not create log file in {}: {:?}", args.log_dir, e);
            std::process::exit(1);
        }
    };

    // Create non-blocking writers for both the file and stdout
    let (non_blocking_file, _guard1) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);
    let (non_blocking_stdout, _guard2) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stdout());
    let _subscriber = registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stdout))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
        .init();
    info!("{} {}", product_name, copyright);
    let remaining = pargs.finish();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Got control-c");
        std::thread::sleep(Duration::from_secs(1));
        info!("Exiting");
        std::process::exit(-1);
    }) {
        warn!("Could not install control-c handler: {:?}", e);
    }

    let (solver, device) = get_dependencies(Arguments::from_vec(remaining));
    async_main(args, solver, device);
}

fn get_camera(device: Option<Box<dyn ImagingDevice + Send>>, test_image: Option<&str>)
              -> Box<dyn ImagingDevice + Send> {
    if let Some(device) = device {
        return device;
    }
    let image = match test_image {
        Some(path) => match image::open(path) {
            Ok(img) => {
                info!("Using test image {} instead of camera.", path);
                img
            },
            Err(e) => {
                error!("Could not read test image {}: {:?}", path, e);
                std::process::exit(1);
            }
        },
        // Fake up a uniform grey image.
        None => DynamicImage::ImageLuma8(GrayImage::from_pixel(
            PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, Luma([16_u8]))),
    };
    match ImageCamera::new(image) {
        Ok(camera) => Box::new(camera),
        Err(e) => {
            error!("Could not create image camera: {:?}", e);
            std::process::exit(1);
        }
    }
}

fn get_star_names(path: Option<&str>) -> StarNames {
    let Some(path) = path else {
        return StarNames::default();
    };
    match StarNames::load(Path::new(path)) {
        Ok(names) => {
            info!("Loaded {} star names from {}", names.len(), path);
            names
        },
        Err(e) => {
            warn!("Could not load star names from {}: {:?}", path, e);
            StarNames::default()
        }
    }
}

#[tokio::main]
async fn async_main(
    args: AppArgs,
    solver: Arc<tokio::sync::Mutex<dyn PlateSolverTrait + Send + Sync>>,
    device: Option<Box<dyn ImagingDevice + Send>>)
{
    // If any thread panics, bail out.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Thread panicked: {}", panic_info);
        std::process::exit(1);
    }));

    if !(-MAX_DISTORTION..=MAX_DISTORTION).contains(&args.distortion) {
        error!("Invalid distortion argument {}, must be within [{}, {}]",
               args.distortion, -MAX_DISTORTION, MAX_DISTORTION);
        std::process::exit(1);
    }

    let mut device = get_camera(device, args.test_image.as_deref());
    info!("Using camera {} {}x{}", device.model(),
          device.pixel_array_size().0, device.pixel_array_size().1);
    info!("Camera controls:\n{}", control_table(&device.control_ranges()));
    if let Err(e) = safe_set_controls(&mut *device, &initial_controls()).await {
        warn!("Could not apply initial controls: {:?}", e);
    }
    let camera = Arc::new(tokio::sync::Mutex::new(device));

    let state = Arc::new(SharedState::new());
    let mut capture_engine = CaptureEngine::new(
        camera.clone(), state.clone(),
        CaptureSettings{fps_interval: args.fps_interval, ..Default::default()});
    capture_engine.start();

    let shared_telescope_position =
        Arc::new(tokio::sync::Mutex::new(TelescopePosition::new()));

    let annotator = Annotator::new(get_star_names(args.star_names.as_deref()),
                                   load_font(args.label_font.as_deref().map(Path::new)));
    let fixtures = FixturePool::new(&PathBuf::from(&args.fixtures_dir));
    info!("Test mode images from {:?} ({} found)", fixtures.dir(), fixtures.list().len());
    let mut solve_engine = SolveEngine::new(
        camera.clone(), solver, state.clone(), fixtures,
        Some(Arc::new(AlpacaPointing::new(shared_telescope_position.clone()))),
        annotator,
        SolveSettings{
            distortion: args.distortion,
            solve_timeout: args.solve_timeout,
            solve_rate_interval: args.solve_rate_interval,
        });
    solve_engine.start_rate_aggregator();

    let app = Arc::new(AppState::new(camera, state, Arc::new(solve_engine)).await);
    let router = create_router(app, Path::new(&args.static_dir));

    // Listen on any address for the given port.
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let builder = match hyper::Server::try_bind(&addr) {
        Ok(builder) => builder,
        Err(e) => {
            error!("Could not listen at {:?}: {:?}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening at {:?}", addr);
    let service_future = builder.serve(router.into_make_service());

    // Spin up ASCOM Alpaca server for reporting our RA/Dec solution as the
    // telescope position.
    let alpaca_server = create_alpaca_server(shared_telescope_position, args.alpaca_port);
    let alpaca_server_future = alpaca_server.start();

    let (service_result, alpaca_result) = join!(service_future, alpaca_server_future);
    if let Err(e) = service_result {
        error!("HTTP server failed: {:?}", e);
    }
    if let Err(e) = alpaca_result {
        error!("Alpaca server failed: {:?}", e);
    }
    capture_engine.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-2").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_args() {
        let mut pargs = Arguments::from_vec(
            ["--port", "9000", "--distortion", "-0.05", "--solve_timeout", "2",
             "--solver_arg", "x"].iter().map(|s| s.into()).collect());
        let args = parse_args(&mut pargs).unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.alpaca_port, 11111);
        assert_eq!(args.distortion, -0.05);
        assert_eq!(args.solve_timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.fps_interval, Duration::from_secs(1));
        assert_eq!(args.solve_rate_interval, Duration::from_secs(10));
        assert_eq!(args.static_dir, "./static");
        assert!(args.test_image.is_none());
        // Unconsumed flags are left for get_dependencies.
        assert_eq!(pargs.finish().len(), 2);

        let mut bad = Arguments::from_vec(
            ["--solve_timeout", "never"].iter().map(|s| s.into()).collect());
        assert!(parse_args(&mut bad).is_err());
    }

    #[test]
    fn test_placeholder_camera() {
        let camera = get_camera(None, None);
        assert_eq!(camera.pixel_array_size(), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));
        assert!(get_star_names(None).is_empty());
    }
}  // mod tests.
