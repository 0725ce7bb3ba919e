//! Vision Tower Encoding Example
//!
//! Pads and preprocesses images for a timm vision tower, encodes them, and
//! optionally tokenizes a prompt containing `<image>` markers.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p robin-vl --example encode_image -- [OPTIONS] <IMAGES>...
//! ```
//!
//! # Arguments
//!
//! * `-t, --vision-tower` - timm hub name or local directory (config.json + model.safetensors)
//! * `-d, --device` - Device to run on: cpu, cuda, or cuda:N (default: cpu)
//! * `--aspect-ratio` - `pad` to pad images to a square first, anything else keeps them as is
//! * `--select-feature` - `patch` or `cls_patch` (default: patch)
//! * `--tokenizer` - Optional tokenizer.json used to tokenize `--prompt`
//! * `--prompt` - Prompt to tokenize (default: "USER: <image>\nDescribe the image. ASSISTANT:")
//! * `-v, --verbose` - Enable verbose output
//!
//! # Examples
//!
//! ```bash
//! cargo run -p robin-vl --example encode_image -- \
//!     -t vit_large_patch14_dinov2.lvd142m --aspect-ratio pad \
//!     cat.jpg dog.png
//!
//! cargo run -p robin-vl --features cuda --example encode_image -- \
//!     -t models/dinov2 -d cuda --tokenizer models/llm/tokenizer.json \
//!     cat.jpg
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use robin_core::core::init_tracing;
use robin_core::utils::load_image;
use robin_vl::get_model_name_from_path;
use robin_vl::processing::{ImageAspectRatio, process_images};
use robin_vl::tokenization::{HfTokenizer, IMAGE_TOKEN_INDEX, tokenizer_image_token};
use robin_vl::utils::parse_device;
use robin_vl::vision::{TimmVisionTower, VisionTowerArgs};

/// Command-line arguments for the encoding example
#[derive(Parser)]
#[command(name = "encode_image")]
#[command(about = "Encodes images with a timm vision tower using Candle")]
struct Args {
    /// timm hub name or local directory holding config.json and model.safetensors
    #[arg(short = 't', long, default_value = "vit_large_patch14_dinov2.lvd142m")]
    vision_tower: String,

    /// Paths to input images to encode
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Device to run on: cpu, cuda, or cuda:N
    #[arg(short, long, default_value = "cpu")]
    device: String,

    /// Image aspect ratio handling: pad, or anything else to keep images as is
    #[arg(long, default_value = "pad")]
    aspect_ratio: String,

    /// Which tokens to return: patch or cls_patch
    #[arg(long, default_value = "patch")]
    select_feature: String,

    /// Optional tokenizer.json used to tokenize the prompt
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Prompt with <image> markers
    #[arg(long, default_value = "USER: <image>\nDescribe the image. ASSISTANT:")]
    prompt: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    info!(
        "Vision tower encoding example ({})",
        get_model_name_from_path(&args.vision_tower)
    );

    let (paths, images): (Vec<_>, Vec<_>) = args
        .images
        .iter()
        .filter_map(|path| match load_image(path) {
            Ok(img) => {
                if args.verbose {
                    info!("Loaded {}: {}x{}", path.display(), img.width(), img.height());
                }
                Some((path, img))
            }
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                None
            }
        })
        .unzip();

    if images.is_empty() {
        error!("No valid image files found");
        return Err("No valid image files found".into());
    }

    let device = parse_device(&args.device)?;
    info!("Using device: {:?}", device);

    let tower_args = VisionTowerArgs {
        mm_vision_select_feature: Some(args.select_feature.clone()),
        ..VisionTowerArgs::default()
    };

    let load_start = Instant::now();
    let tower = TimmVisionTower::new(&args.vision_tower, &tower_args, device.clone(), false)?;
    info!(
        "Vision tower loaded in {:.2}ms",
        load_start.elapsed().as_secs_f64() * 1000.0
    );

    if args.verbose {
        let cfg = tower.config()?;
        info!("Vision tower configuration:");
        info!("  hidden_size: {}", tower.hidden_size()?);
        info!("  depth: {}", cfg.depth);
        info!("  num_heads: {}", cfg.num_heads);
        info!("  image_size: {}", cfg.image_size);
        info!("  num_patches: {}", cfg.num_patches());
    }

    let aspect_ratio: ImageAspectRatio = args.aspect_ratio.parse()?;
    let processed = process_images(&images, tower.image_processor()?, aspect_ratio, &device)?;

    let infer_start = Instant::now();
    let features = tower.forward_list(&processed.tensors()?)?;
    info!(
        "Encoded {} images in {:.2}ms",
        features.len(),
        infer_start.elapsed().as_secs_f64() * 1000.0
    );
    for (path, feats) in paths.iter().zip(&features) {
        info!("  {}: features {:?}", path.display(), feats.dims());
    }

    if let Some(tokenizer_path) = &args.tokenizer {
        let tokenizer = HfTokenizer::from_file(tokenizer_path)?;
        let input_ids = tokenizer_image_token(&args.prompt, &tokenizer, IMAGE_TOKEN_INDEX)?;
        let placeholders = input_ids.iter().filter(|&&id| id == IMAGE_TOKEN_INDEX).count();
        info!(
            "Prompt tokenized to {} ids with {} image placeholders",
            input_ids.len(),
            placeholders
        );
        if args.verbose {
            info!("  input_ids: {:?}", input_ids);
        }
    }

    Ok(())
}
