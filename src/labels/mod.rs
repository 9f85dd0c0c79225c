use std::{
    borrow::Cow,
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, DynamicImage, Luma, Rgba, RgbImage, RgbaImage};
use imageproc::{drawing, rect::Rect};
use once_cell::sync::Lazy;
use qrcode::QrCode;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, error, info, warn};

use crate::{config::DEFAULT_DEVICES_CSV, directory::DeviceDirectory, model::Device};

pub mod font;

// Label geometry, in pixels.
const LABEL_WIDTH: u32 = 580;
const LABEL_HEIGHT: u32 = 120;
const MARGIN: u32 = 10;
const QR_SIZE: u32 = 100;
const STRIP_WIDTH: u32 = 45;
const LOGO_SIZE: u32 = 80;
const TEXT_X: i32 = 180;
const TEXT_ROWS: [i32; 3] = [20, 50, 80];

const STRIP_COLOR: Rgba<u8> = Rgba([128, 40, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

const BOLD_SIZE: f32 = 22.0;
const REGULAR_SIZE: f32 = 20.0;
const BITMAP_SCALE: u32 = 2;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid filename regex"));

#[derive(Debug, Clone)]
pub struct LabelConfig {
    pub devices_csv: PathBuf,
    pub logo: PathBuf,
    pub output_dir: PathBuf,
    /// Address the QR codes point at; the scan form lives here.
    pub base_url: String,
    pub font_bold: PathBuf,
    pub font_regular: PathBuf,
    pub org_name: String,
    pub contact: String,
}

impl LabelConfig {
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| dotenvy::var(key).unwrap_or_else(|_| default.to_string());
        Self {
            devices_csv: var("LOOMA_DEVICES_CSV", DEFAULT_DEVICES_CSV).into(),
            logo: var("LABEL_LOGO", "Looma-2019.png").into(),
            output_dir: var("LABEL_OUTPUT_DIR", "qr_labels").into(),
            base_url: var("LABEL_BASE_URL", "http://127.0.0.1:5000/"),
            font_bold: var("LABEL_FONT_BOLD", "arialbd.ttf").into(),
            font_regular: var("LABEL_FONT_REGULAR", "arial.ttf").into(),
            org_name: var("LABEL_ORG_NAME", "Looma Education"),
            contact: var("LABEL_CONTACT", "+977 9812345678"),
        }
    }
}

pub enum LabelFont {
    TrueType { font: FontVec, size: f32 },
    Bitmap { scale: u32 },
}

impl LabelFont {
    /// Falls back to the built-in bitmap font when the file is missing or unreadable.
    pub fn load(path: &Path, size: f32) -> Self {
        let loaded = fs::read(path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(anyhow::Error::from));

        match loaded {
            Ok(font) => LabelFont::TrueType { font, size },
            Err(err) => {
                warn!(path = %path.display(), %err, "TrueType font unavailable, using built-in font");
                LabelFont::Bitmap {
                    scale: BITMAP_SCALE,
                }
            }
        }
    }

    fn draw(&self, image: &mut RgbaImage, x: i32, y: i32, text: &str) {
        match self {
            LabelFont::TrueType { font, size } => {
                drawing::draw_text_mut(image, BLACK, x, y, PxScale::from(*size), font, text)
            }
            LabelFont::Bitmap { scale } => font::draw_bitmap_text(image, x, y, *scale, text, BLACK),
        }
    }
}

/// Logo and fonts, loaded once per process.
pub struct LabelAssets {
    logo: RgbaImage,
    bold: LabelFont,
    regular: LabelFont,
}

impl LabelAssets {
    pub fn load(config: &LabelConfig) -> Result<Self> {
        let logo = image::open(&config.logo)
            .with_context(|| format!("Logo file '{}' not found or unreadable", config.logo.display()))?
            .resize_exact(LOGO_SIZE, LOGO_SIZE, FilterType::Lanczos3)
            .to_rgba8();

        Ok(Self {
            // Quarter turn clockwise so the logo reads along the strip.
            logo: imageops::rotate90(&logo),
            bold: LabelFont::load(&config.font_bold, BOLD_SIZE),
            regular: LabelFont::load(&config.font_regular, REGULAR_SIZE),
        })
    }
}

/// URL encoded into each label's QR code.
pub fn qr_payload(base_url: &str, device: &Device) -> Result<String> {
    let mut url = Url::parse(base_url).with_context(|| format!("Invalid label base URL {base_url}"))?;
    url.query_pairs_mut()
        .append_pair("serial", &device.serial)
        .append_pair("model", &device.model)
        .append_pair("build", &device.build);
    Ok(url.into())
}

/// Serial with every character outside `[A-Za-z0-9._-]` replaced by `_`.
/// Borrowed when nothing had to change.
pub fn file_stem(serial: &str) -> Cow<'_, str> {
    UNSAFE_FILENAME_CHARS.replace_all(serial, "_")
}

pub fn label_file_name(serial: &str, index: u32) -> String {
    format!("{}_{index}.png", file_stem(serial))
}

/// Positive integer, or `None` for anything else.
pub fn parse_quantity(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|q| *q > 0)
}

pub struct LabelGenerator {
    config: LabelConfig,
    assets: LabelAssets,
    directory: DeviceDirectory,
}

impl LabelGenerator {
    pub fn new(config: LabelConfig) -> Result<Self> {
        let assets = LabelAssets::load(&config)?;
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid label base URL {}", config.base_url))?;
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Failed to create output dir {}", config.output_dir.display())
        })?;

        Ok(Self {
            directory: DeviceDirectory::new(config.devices_csv.clone()),
            config,
            assets,
        })
    }

    /// Prompt loop: serial, then quantity, until `exit` or end of input.
    pub fn run(&self, mut input: impl BufRead, mut out: impl Write) -> Result<()> {
        loop {
            let Some(serial) = prompt(
                &mut input,
                &mut out,
                "Enter the serial number of the device (or type 'exit' to quit): ",
            )?
            else {
                break;
            };
            if serial.eq_ignore_ascii_case("exit") {
                break;
            }

            let Some(raw_quantity) = prompt(
                &mut input,
                &mut out,
                "Enter how many QR codes to generate for this serial: ",
            )?
            else {
                break;
            };

            let Some(quantity) = parse_quantity(&raw_quantity) else {
                warn!(input = %raw_quantity, "invalid quantity, enter a positive integer");
                continue;
            };

            let Some(device) = self.directory.lookup(&serial) else {
                warn!(%serial, "no device found with serial");
                continue;
            };

            info!(serial = %device.serial, quantity, "generating QR labels");
            if let Err(err) = self.generate(&device, quantity) {
                error!(serial = %device.serial, "label batch stopped: {err:#}");
            }
        }

        info!("exiting QR label generator");
        Ok(())
    }

    /// Writes `<serial>_1.png` .. `<serial>_<quantity>.png`, replacing older files of the same name.
    pub fn generate(&self, device: &Device, quantity: u32) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(quantity as usize);

        if let Cow::Owned(stem) = file_stem(&device.serial) {
            warn!(
                serial = %device.serial,
                %stem,
                "serial rewritten for file names, labels may overwrite another serial's"
            );
        }

        for i in 1..=quantity {
            let payload = qr_payload(&self.config.base_url, device)?;
            let label = self.render(device, &payload)?;

            let path = self.config.output_dir.join(label_file_name(&device.serial, i));
            if path.exists() {
                debug!(path = %path.display(), "overwriting existing label");
            }
            label
                .save(&path)
                .with_context(|| format!("Failed to write label {}", path.display()))?;

            info!("Label {i}/{quantity} saved: {}", path.display());
            written.push(path);
        }

        Ok(written)
    }

    pub fn render(&self, device: &Device, payload: &str) -> Result<RgbImage> {
        let code = QrCode::new(payload.as_bytes())?;
        let qr = code.render::<Luma<u8>>().build();
        let qr = imageops::resize(&qr, QR_SIZE, QR_SIZE, FilterType::Nearest);
        let qr = DynamicImage::ImageLuma8(qr).to_rgba8();

        let mut label = RgbaImage::from_pixel(LABEL_WIDTH, LABEL_HEIGHT, WHITE);

        let strip_height = LABEL_HEIGHT - 2 * MARGIN;
        let strip_x = (LABEL_WIDTH - STRIP_WIDTH - MARGIN) as i32;
        let strip_y = MARGIN as i32;
        drawing::draw_filled_rect_mut(
            &mut label,
            Rect::at(strip_x, strip_y).of_size(STRIP_WIDTH, strip_height),
            STRIP_COLOR,
        );

        imageops::overlay(&mut label, &qr, MARGIN as i64, MARGIN as i64);

        // The logo is wider than the strip; centering it lets it spill over both edges.
        let logo = &self.assets.logo;
        let logo_x = strip_x as i64 + (STRIP_WIDTH as i64 - logo.width() as i64).div_euclid(2);
        let logo_y = strip_y as i64 + (strip_height as i64 - logo.height() as i64).div_euclid(2);
        imageops::overlay(&mut label, logo, logo_x, logo_y);

        let lines = [
            (&self.assets.bold, self.config.org_name.clone()),
            (&self.assets.regular, self.config.contact.clone()),
            (&self.assets.bold, format!("serial number: {}", device.serial)),
        ];
        for ((font, text), y) in lines.iter().zip(TEXT_ROWS) {
            font.draw(&mut label, TEXT_X, y, text);
        }

        Ok(DynamicImage::ImageRgba8(label).to_rgb8())
    }
}

fn prompt(input: &mut impl BufRead, out: &mut impl Write, question: &str) -> Result<Option<String>> {
    write!(out, "{question}")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
