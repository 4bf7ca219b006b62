//! pcbalign CLI: board bounds, contact detection and front/back registration.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use pcbalign::{
    align_board_pair, detect_contacts, detect_side_vias, preprocess_side, AlignConfig,
    ContactSpec, Outcome, Rect, Side, Verbosity, ViaProfile,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pcbalign")]
#[command(about = "Register front/back PCB scans using edge-connector contacts and vias")]
#[command(version)]
struct Cli {
    /// More log output (repeat for per-item detail).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Warnings only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Pipeline configuration (JSON); unspecified fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the board silhouette, deskew and crop one scan.
    Bounds(BoundsArgs),

    /// Detect the connector contacts of one scan.
    Contacts(ContactsArgs),

    /// Detect vias on one scan.
    Vias(ViasArgs),

    /// Register a back scan onto a front scan.
    Align(AlignArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Front,
    Back,
}

impl From<SideArg> for Side {
    fn from(s: SideArg) -> Self {
        match s {
            SideArg::Front => Side::Front,
            SideArg::Back => Side::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Strict,
    Relaxed,
    Permissive,
}

impl From<ProfileArg> for ViaProfile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Strict => ViaProfile::Strict,
            ProfileArg::Relaxed => ViaProfile::Relaxed,
            ProfileArg::Permissive => ViaProfile::Permissive,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Path to the scan.
    #[arg(long)]
    image: PathBuf,

    /// Which face the scan shows (back scans honour `mirror_back`).
    #[arg(long, value_enum, default_value_t = SideArg::Front)]
    side: SideArg,

    /// Path to write results (JSON). Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BoundsArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Write the deskewed, cropped scan (PNG).
    #[arg(long)]
    processed: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ContactsArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Contact specification (JSON).
    #[arg(long)]
    spec: PathBuf,

    /// Scan resolution; estimated from the contact pitch when omitted.
    #[arg(long)]
    dpi: Option<f64>,
}

#[derive(Debug, Clone, Args)]
struct ViasArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Scan resolution; pixel fallbacks are used when omitted.
    #[arg(long)]
    dpi: Option<f64>,

    /// Detection profile.
    #[arg(long, value_enum, default_value_t = ProfileArg::Strict)]
    profile: ProfileArg,
}

#[derive(Debug, Clone, Args)]
struct AlignArgs {
    /// Front scan.
    #[arg(long)]
    front: PathBuf,

    /// Back scan.
    #[arg(long)]
    back: PathBuf,

    /// Contact specification (JSON).
    #[arg(long)]
    spec: PathBuf,

    /// Scan resolution; estimated from the contact pitch when omitted.
    #[arg(long)]
    dpi: Option<f64>,

    /// Path to write results (JSON). Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the back scan warped into the front frame (PNG).
    #[arg(long)]
    warped: Option<PathBuf>,
}

fn verbosity(cli: &Cli, config: &AlignConfig) -> Verbosity {
    if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => config.verbosity,
            1 => Verbosity::Summary,
            _ => Verbosity::Detailed,
        }
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AlignConfig::from_json_file(path)?,
        None => AlignConfig::default(),
    };
    config.verbosity = verbosity(&cli, &config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.verbosity.filter_directive())),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Bounds(args) => run_bounds(args, &config),
        Commands::Contacts(args) => run_contacts(args, &config),
        Commands::Vias(args) => run_vias(args, &config),
        Commands::Align(args) => run_align(args, &config),
    }
}

fn load_rgb(path: &Path) -> CliResult<image::RgbImage> {
    tracing::info!("Loading image: {}", path.display());
    let img = image::open(path)
        .map_err(|e| -> CliError { format!("failed to open {}: {}", path.display(), e).into() })?
        .to_rgb8();
    tracing::info!("Image size: {}x{}", img.width(), img.height());
    Ok(img)
}

fn write_json(value: &serde_json::Value, out: Option<&Path>) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn status<T>(outcome: &Outcome<T>) -> serde_json::Value {
    match outcome.reason() {
        None => serde_json::json!({ "complete": true }),
        Some(reason) => serde_json::json!({
            "complete": false,
            "reason": reason,
            "message": reason.to_string(),
        }),
    }
}

fn mirror_for(side: SideArg, config: &AlignConfig) -> bool {
    matches!(side, SideArg::Back) && config.mirror_back
}

// ── bounds ────────────────────────────────────────────────────────────

fn run_bounds(args: &BoundsArgs, config: &AlignConfig) -> CliResult<()> {
    let img = load_rgb(&args.scan.image)?;
    let side = args.scan.side;
    let outcome = preprocess_side(&img, side.into(), mirror_for(side, config), &config.bounds)?;
    let processed = outcome.value();

    if let Some(path) = &args.processed {
        processed.image.save(path)?;
        tracing::info!("Processed scan written to {}", path.display());
    }

    let value = serde_json::json!({
        "status": status(&outcome),
        "bounds": processed.bounds,
        "meta": processed.meta,
    });
    write_json(&value, args.scan.out.as_deref())
}

// ── contacts ──────────────────────────────────────────────────────────

fn run_contacts(args: &ContactsArgs, config: &AlignConfig) -> CliResult<()> {
    let spec = ContactSpec::from_json_file(&args.spec)?;
    let img = load_rgb(&args.scan.image)?;
    let side = args.scan.side;
    let pre = preprocess_side(&img, side.into(), mirror_for(side, config), &config.bounds)?;
    let processed = pre.value();
    let board = Rect::full(processed.image.width(), processed.image.height());
    let outcome = detect_contacts(
        &processed.image,
        &board,
        &spec,
        args.dpi,
        &config.contacts,
        &config.filter,
    )?;

    let res = outcome.value();
    tracing::info!(
        "{} contacts on the {} edge ({} observed), dpi {:?}",
        res.contacts.len(),
        res.edge,
        res.observed_count(),
        res.dpi
    );
    let value = serde_json::json!({
        "status": status(&outcome),
        "bounds_status": status(&pre),
        "meta": processed.meta,
        "detection": res,
    });
    write_json(&value, args.scan.out.as_deref())
}

// ── vias ──────────────────────────────────────────────────────────────

fn run_vias(args: &ViasArgs, config: &AlignConfig) -> CliResult<()> {
    let img = load_rgb(&args.scan.image)?;
    let side = args.scan.side;
    let pre = preprocess_side(&img, side.into(), mirror_for(side, config), &config.bounds)?;
    let processed = pre.value();

    let profile = ViaProfile::from(args.profile);
    let params = profile.params(config.vias.radius_range_px(args.dpi), config.vias.bright_core);
    let vias = detect_side_vias(&processed.image, &params, &config.vias, args.dpi);
    tracing::info!("{} vias with the {} profile", vias.len(), profile);

    let value = serde_json::json!({
        "bounds_status": status(&pre),
        "meta": processed.meta,
        "profile": profile,
        "vias": vias,
    });
    write_json(&value, args.scan.out.as_deref())
}

// ── align ─────────────────────────────────────────────────────────────

fn run_align(args: &AlignArgs, config: &AlignConfig) -> CliResult<()> {
    let spec = ContactSpec::from_json_file(&args.spec)?;
    let front = load_rgb(&args.front)?;
    let back = load_rgb(&args.back)?;

    let outcome = align_board_pair(&front, &back, &spec, args.dpi, config)?;
    let aligned = outcome.value();
    let result = &aligned.result;
    tracing::info!(
        "transform [{:.6} {:.6} {:.2}; {:.6} {:.6} {:.2}], {} pairs, rms {:.3}px",
        result.transform.a,
        result.transform.b,
        result.transform.tx,
        result.transform.c,
        result.transform.d,
        result.transform.ty,
        result.matched,
        result.stats.rms_px
    );

    if let Some(path) = &args.warped {
        let warped = match result.transform_original {
            Some(t) => pcbalign::raster::warp_affine(
                &back,
                &t,
                front.width(),
                front.height(),
                image::Rgb([0, 0, 0]),
            ),
            None => {
                let f = &aligned.front.processed.image;
                pcbalign::raster::warp_affine(
                    &aligned.back.processed.image,
                    &result.transform,
                    f.width(),
                    f.height(),
                    image::Rgb([0, 0, 0]),
                )
            }
        };
        warped.save(path)?;
        tracing::info!("Warped back scan written to {}", path.display());
    }

    let value = serde_json::json!({
        "status": status(&outcome),
        "alignment": aligned,
    });
    write_json(&value, args.out.as_deref())
}
