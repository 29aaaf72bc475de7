//! Visual regression testing with screenshot comparison

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Pixel};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::VisualConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::session::AutomationDriver;

/// Allowed per-channel difference before two pixels count as different
const TOLERANCE: i32 = 5;

/// Status bar height on retina iOS screenshots
const IOS_STATUS_BAR: u32 = 40;

/// Element rectangle as reported by the automation server
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ElementBounds {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Part of a screenshot to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Main window of an iOS app; bounds are in points, screenshots in pixels
    pub fn for_ios_window(bounds: &ElementBounds) -> Self {
        Self {
            x: 0,
            y: IOS_STATUS_BAR,
            width: to_px(bounds.width * 2.0),
            height: to_px(bounds.height * 2.0),
        }
    }

    /// Decor view of an Android activity, which already excludes the status bar
    pub fn for_android_decor(bounds: &ElementBounds) -> Self {
        Self {
            x: to_px(bounds.x),
            y: to_px(bounds.y),
            width: to_px(bounds.width),
            height: to_px(bounds.height),
        }
    }

    /// Clamp to an image of `width` x `height`; `None` if nothing is left
    fn clamp(&self, width: u32, height: u32) -> Option<Self> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let clamped = Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        };
        (clamped.width > 0 && clamped.height > 0).then_some(clamped)
    }
}

fn to_px(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

/// Comparison settings for one screenshot
#[derive(Debug, Clone, Copy)]
pub struct CompareOptions {
    /// Allowed mismatch, in percent
    pub threshold: f64,
    /// Replace the reference instead of comparing against it
    pub overwrite: bool,
}

impl CompareOptions {
    pub fn from_config(config: &VisualConfig) -> Self {
        Self {
            threshold: config.threshold,
            overwrite: false,
        }
    }
}

/// What `process` did with a screenshot
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenshotOutcome {
    ReferenceWritten(PathBuf),
    Matched { mismatch: f64 },
}

/// Compares device screenshots with stored references
pub struct ScreenshotComparer {
    /// Where test screenshots are written while being compared
    screenshot_dir: PathBuf,
}

impl ScreenshotComparer {
    pub fn new(project_root: &Path, config: &VisualConfig) -> Self {
        Self {
            screenshot_dir: project_root.join(&config.screenshot_dir),
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Crop a base64 PNG and either store it as the reference or check it
    /// against the reference
    ///
    /// The test image is kept under the screenshot directory only when the
    /// comparison fails.
    pub fn process(
        &self,
        reference: &Path,
        screenshot: &str,
        crop: Option<CropRegion>,
        options: CompareOptions,
    ) -> HarnessResult<ScreenshotOutcome> {
        std::fs::create_dir_all(&self.screenshot_dir)?;
        let image = crop_image(decode_png(screenshot)?, crop)?;

        if options.overwrite {
            debug!("Overwrite set, writing image to {}", reference.display());
            if let Some(parent) = reference.parent() {
                std::fs::create_dir_all(parent)?;
            }
            save_png(&image, reference)?;
            return Ok(ScreenshotOutcome::ReferenceWritten(reference.to_path_buf()));
        }

        if !reference.exists() {
            let name = reference
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| reference.display().to_string());
            return Err(HarnessError::ReferenceNotFound(name));
        }

        let test_path = self.test_path(reference);
        debug!("Comparing {} to {}", test_path.display(), reference.display());
        save_png(&image, &test_path)?;

        let mismatch = compare_files(&test_path, reference)?;
        if mismatch <= options.threshold {
            std::fs::remove_file(&test_path)?;
            Ok(ScreenshotOutcome::Matched { mismatch })
        } else {
            warn!(
                "Visual regression against '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                reference.display(),
                mismatch,
                options.threshold
            );
            Err(HarnessError::ScreenshotMismatch {
                mismatch,
                threshold: options.threshold,
            })
        }
    }

    /// `<screenshot dir>/<reference stem>_Test.png`
    fn test_path(&self, reference: &Path) -> PathBuf {
        let stem = reference
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot".to_string());
        self.screenshot_dir.join(format!("{}_Test.png", stem))
    }
}

/// Wait, take a screenshot through the session and process it
pub async fn screenshot_test(
    driver: &dyn AutomationDriver,
    comparer: &ScreenshotComparer,
    reference: &Path,
    crop: Option<CropRegion>,
    options: CompareOptions,
    delay: Duration,
) -> HarnessResult<ScreenshotOutcome> {
    tokio::time::sleep(delay).await;
    let screenshot = driver.take_screenshot().await?;
    let outcome = comparer.process(reference, &screenshot, crop, options)?;
    info!("Screenshot check against {} passed", reference.display());
    Ok(outcome)
}

fn decode_png(screenshot: &str) -> HarnessResult<DynamicImage> {
    let cleaned: String = screenshot.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(cleaned)?;
    Ok(image::load_from_memory(&bytes)?)
}

fn crop_image(image: DynamicImage, crop: Option<CropRegion>) -> HarnessResult<DynamicImage> {
    let Some(region) = crop else {
        return Ok(image);
    };
    let (width, height) = image.dimensions();
    let area = region.clamp(width, height).ok_or_else(|| {
        HarnessError::VisualRegression(format!(
            "crop {:?} falls outside a {}x{} screenshot",
            region, width, height
        ))
    })?;
    Ok(image.crop_imm(area.x, area.y, area.width, area.height))
}

fn save_png(image: &DynamicImage, path: &Path) -> HarnessResult<()> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn hash_file(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Percentage of pixels that differ between two image files
///
/// Pixels outside the overlap of differently sized images count as different.
pub fn compare_files(actual: &Path, reference: &Path) -> HarnessResult<f64> {
    if hash_file(actual)? == hash_file(reference)? {
        debug!("Screenshots match exactly (same hash)");
        return Ok(0.0);
    }

    let actual = image::open(actual)?.to_rgba8();
    let reference = image::open(reference)?.to_rgba8();
    if actual.dimensions() != reference.dimensions() {
        warn!(
            "Screenshot dimensions differ: {:?} vs reference {:?}",
            actual.dimensions(),
            reference.dimensions()
        );
    }

    let width = actual.width().max(reference.width());
    let height = actual.height().max(reference.height());
    let total = u64::from(width) * u64::from(height);
    if total == 0 {
        return Ok(0.0);
    }

    let overlap_w = actual.width().min(reference.width());
    let overlap_h = actual.height().min(reference.height());
    let mut same = 0u64;
    for y in 0..overlap_h {
        for x in 0..overlap_w {
            if !pixels_differ(actual.get_pixel(x, y), reference.get_pixel(x, y)) {
                same += 1;
            }
        }
    }

    Ok((total - same) as f64 / total as f64 * 100.0)
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (i32::from(*x) - i32::from(*y)).abs() > TOLERANCE)
}
