use anyhow::{bail, Context, Result};
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use std::{net::IpAddr, path::PathBuf, time::Duration};

use crate::validators::*;
use atlas_tile_cache::{
    default_cache_root, BoundingBox, Config, ErrorPolicy, FetchOptions, UrlFormat, ZoomTier,
    DEFAULT_ERROR_LOG, DEFAULT_TILE_URL,
};

const GENERATE_CMD: &str = "generate";
const SERVER_CMD: &str = "server";
const COORDS_CMD: &str = "coords";

const ZOOM_ARG: &str = "zoom";
const LAT1_ARG: &str = "lat1";
const LONG1_ARG: &str = "long1";
const LAT2_ARG: &str = "lat2";
const LONG2_ARG: &str = "long2";
const FAST_ARG: &str = "fast";
const DELAY_ARG: &str = "delay";
const CONTINUE_ARG: &str = "continue_on_error";
const TELEMETRY_ARG: &str = "telemetry";
const DRY_RUN_ARG: &str = "dry_run";
const SERVE_ARG: &str = "serve";
const NO_SERVE_ARG: &str = "no_serve";
const NO_BROWSER_ARG: &str = "no_browser";
const CACHE_DIR_ARG: &str = "cache_dir";
const URL_ARG: &str = "url";
const TIMEOUT_ARG: &str = "timeout";
const ERROR_LOG_ARG: &str = "error_log";
const PORT_ARG: &str = "port";
const HOST_ARG: &str = "host";
const LAT_ARG: &str = "lat";
const LONG_ARG: &str = "long";
const LEVEL_ARG: &str = "level";

pub enum Args {
    Generate(GenerateArgs),
    Server(ServerArgs),
    Coords(CoordsArgs),
}

pub struct GenerateArgs {
    pub bounding_box: BoundingBox,
    pub tiers: Vec<ZoomTier>,
    pub delay: Duration,
    pub continue_on_error: bool,
    pub telemetry: bool,
    pub dry_run: bool,
    /// `None` asks interactively.
    pub serve: Option<bool>,
    /// Open the viewer in the browser once the preview server is up.
    pub open_browser: bool,
    pub server: ServerArgs,
}

/// Settings shared by the preview server and the fetch pipeline.
#[derive(Clone)]
pub struct ServerArgs {
    pub host: IpAddr,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub url: String,
    pub timeout: Duration,
    pub error_log: PathBuf,
}

pub struct CoordsArgs {
    pub lat: f64,
    pub long: f64,
    pub level: ZoomTier,
}

impl std::convert::TryFrom<&GenerateArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: &GenerateArgs) -> Result<Self> {
        let on_error = if args.continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        };

        Ok(Self {
            bounding_box: args.bounding_box,
            tiers: args.tiers.clone(),
            cache_root: args.server.cache_dir.clone(),
            url: UrlFormat::parse(args.server.url.as_str())?,
            timeout: args.server.timeout,
            options: FetchOptions {
                delay: args.delay,
                on_error,
                telemetry: args.telemetry,
            },
            error_log: Some(args.server.error_log.clone()),
        })
    }
}

impl Args {
    pub fn parse() -> Result<Self> {
        Self::from_matches(&cli().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        match matches.subcommand() {
            Some((GENERATE_CMD, m)) => Ok(Args::Generate(GenerateArgs::from_matches(m)?)),
            Some((SERVER_CMD, m)) => Ok(Args::Server(ServerArgs::from_matches(m)?)),
            Some((COORDS_CMD, m)) => Ok(Args::Coords(CoordsArgs {
                lat: required(m, LAT_ARG)?,
                long: required(m, LONG_ARG)?,
                level: required(m, LEVEL_ARG)?,
            })),
            _ => bail!("no subcommand given"),
        }
    }
}

impl GenerateArgs {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let bounding_box = BoundingBox::new_deg(
            required(matches, LAT1_ARG)?,
            required(matches, LONG1_ARG)?,
            required(matches, LAT2_ARG)?,
            required(matches, LONG2_ARG)?,
        )?;

        // fast mode wins over an explicit delay
        let delay = if matches.get_flag(FAST_ARG) {
            Duration::ZERO
        } else {
            required(matches, DELAY_ARG)?
        };

        let serve = if matches.get_flag(SERVE_ARG) {
            Some(true)
        } else if matches.get_flag(NO_SERVE_ARG) {
            Some(false)
        } else {
            None
        };

        Ok(Self {
            bounding_box,
            tiers: matches
                .get_many::<ZoomTier>(ZOOM_ARG)
                .unwrap_or_default()
                .copied()
                .collect(),
            delay,
            continue_on_error: matches.get_flag(CONTINUE_ARG),
            telemetry: matches.get_flag(TELEMETRY_ARG),
            dry_run: matches.get_flag(DRY_RUN_ARG),
            serve,
            open_browser: !matches.get_flag(NO_BROWSER_ARG),
            server: ServerArgs::from_matches(matches)?,
        })
    }
}

impl ServerArgs {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            host: required(matches, HOST_ARG)?,
            port: required(matches, PORT_ARG)?,
            cache_dir: matches
                .get_one::<PathBuf>(CACHE_DIR_ARG)
                .cloned()
                .unwrap_or_else(default_cache_root),
            url: required(matches, URL_ARG)?,
            timeout: required(matches, TIMEOUT_ARG)?,
            error_log: required(matches, ERROR_LOG_ARG)?,
        })
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing argument `{}`", id))
}

fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(GENERATE_CMD)
                .about("Caches map tiles of a bounding box")
                .arg(
                    Arg::new(ZOOM_ARG)
                        .help("Zoom tiers to fetch, in order (country, region, station)")
                        .value_parser(is_zoom_tier)
                        .value_delimiter(',')
                        .action(ArgAction::Append)
                        .default_value("region")
                        .short('z')
                        .long("zoom"),
                )
                .arg(coordinate_arg(LAT1_ARG, "Top left latitude (in degrees)", is_latitude))
                .arg(coordinate_arg(LONG1_ARG, "Top left longitude (in degrees)", is_longitude))
                .arg(coordinate_arg(LAT2_ARG, "Bottom right latitude (in degrees)", is_latitude))
                .arg(coordinate_arg(LONG2_ARG, "Bottom right longitude (in degrees)", is_longitude))
                .arg(
                    Arg::new(FAST_ARG)
                        .help("Skip the delay between tile requests")
                        .action(ArgAction::SetTrue)
                        .short('f')
                        .long("fast"),
                )
                .arg(
                    Arg::new(DELAY_ARG)
                        .help("Seconds to wait between tile requests")
                        .value_parser(is_seconds)
                        .default_value("5")
                        .long("delay"),
                )
                .arg(
                    Arg::new(CONTINUE_ARG)
                        .help("Keep going when a tile fails instead of stopping the run")
                        .action(ArgAction::SetTrue)
                        .long("continue-on-error"),
                )
                .arg(
                    Arg::new(TELEMETRY_ARG)
                        .help("Show throughput and bytes transferred")
                        .action(ArgAction::SetTrue)
                        .long("telemetry"),
                )
                .arg(
                    Arg::new(DRY_RUN_ARG)
                        .help("Don't actually fetch anything, just determine how many tiles would be fetched.")
                        .action(ArgAction::SetTrue)
                        .long("dry-run"),
                )
                .arg(
                    Arg::new(SERVE_ARG)
                        .help("Launch the preview server when done without asking")
                        .action(ArgAction::SetTrue)
                        .conflicts_with(NO_SERVE_ARG)
                        .long("serve"),
                )
                .arg(
                    Arg::new(NO_SERVE_ARG)
                        .help("Don't offer to launch the preview server when done")
                        .action(ArgAction::SetTrue)
                        .long("no-serve"),
                )
                .arg(
                    Arg::new(NO_BROWSER_ARG)
                        .help("Don't open the viewer in a browser when the preview server starts")
                        .action(ArgAction::SetTrue)
                        .long("no-browser"),
                )
                .args(server_args()),
        )
        .subcommand(
            Command::new(SERVER_CMD)
                .about("Runs the map preview and serves cached tiles")
                .args(server_args()),
        )
        .subcommand(
            Command::new(COORDS_CMD)
                .about("Converts latitude/longitude to tile coordinates")
                .arg(coordinate_arg(LAT_ARG, "Latitude (must be between -90 and 90)", is_latitude))
                .arg(coordinate_arg(LONG_ARG, "Longitude (must be between -180 and 180)", is_longitude))
                .arg(
                    Arg::new(LEVEL_ARG)
                        .help("Zoom tier (country, region, station)")
                        .value_parser(is_zoom_tier)
                        .default_value("region")
                        .short('l')
                        .long("level"),
                ),
        )
}

fn coordinate_arg(
    id: &'static str,
    help: &'static str,
    parser: fn(&str) -> Result<f64, String>,
) -> Arg {
    Arg::new(id)
        .help(help)
        .value_parser(parser)
        .required(true)
        .allow_hyphen_values(true)
        .long(id)
}

fn server_args() -> [Arg; 6] {
    [
        Arg::new(PORT_ARG)
            .help("Port of the preview server, the next free one is used if it is taken")
            .value_parser(value_parser!(u16).range(1..))
            .default_value("3000")
            .short('p')
            .long("port"),
        Arg::new(HOST_ARG)
            .help("Address the preview server listens on")
            .value_parser(value_parser!(IpAddr))
            .default_value("127.0.0.1")
            .long("host"),
        Arg::new(CACHE_DIR_ARG)
            .help("The folder tiles are cached in [default: ~/AtlasOSMTiles]")
            .value_parser(value_parser!(PathBuf))
            .long("cache-dir"),
        Arg::new(URL_ARG)
            .help("The URL with format specifiers `{z}`, `{x}` and `{y}` to fetch the tiles from. `{s}` is replaced with `a`, `b` or `c` in turn.")
            .value_parser(is_url_template)
            .default_value(DEFAULT_TILE_URL)
            .short('u')
            .long("url"),
        Arg::new(TIMEOUT_ARG)
            .help("The timeout (in seconds) for fetching a single tile. Pass 0 for no timeout.")
            .value_parser(is_seconds)
            .default_value("30")
            .short('t')
            .long("timeout"),
        Arg::new(ERROR_LOG_ARG)
            .help("File failed tiles are appended to")
            .value_parser(value_parser!(PathBuf))
            .default_value(DEFAULT_ERROR_LOG)
            .long("error-log"),
    ]
}
