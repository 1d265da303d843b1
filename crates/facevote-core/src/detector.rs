//! Haar-cascade face detector.
//!
//! Reads trained cascades in OpenCV's XML layout (the stock
//! `haarcascade_frontalface_default.xml` and friends: `BOOST` stages over
//! `HAAR` features) and evaluates them the way OpenCV's `detectMultiScale`
//! does. The luma plane is downscaled once per pyramid level, and the
//! base-size window slides over each level. Feature responses are divided
//! by the window's variance norm, trees are walked node by node, and a
//! window survives only if every stage sum reaches its threshold. Raw hits
//! are finally clustered with OpenCV's rectangle grouping.
//!
//! The detector is heuristic. False positives and false negatives are
//! expected and are not corrected here.

use crate::frame::Frame;
use crate::types::Region;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
pub const DEFAULT_SCALE_FACTOR: f32 = 1.3;
pub const DEFAULT_MIN_NEIGHBORS: usize = 5;
/// No lower bound: the pyramid starts at the cascade's own window.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 0;
/// Relative tolerance for two raw hits to belong to the same cluster.
const GROUP_EPS: f64 = 0.2;
/// Slack subtracted from every stage threshold when comparing.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;
/// Above this pyramid factor every position is scanned; below it every other.
const DENSE_SCAN_FACTOR: f64 = 2.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}")]
    CascadeNotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cascade xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("unsupported cascade: {0}")]
    UnsupportedCascade(String),
    #[error("invalid detector parameters: {0}")]
    InvalidParameters(String),
}

/// Locates candidate face regions in a frame.
pub trait Detector {
    /// Detect face regions. Results are in detector order (cluster of the
    /// earliest raw hit first; raw hits run smallest scale first, then
    /// top-to-bottom, left-to-right), not ranked by size or confidence. An
    /// empty result is a valid "no face" answer.
    fn detect(&self, frame: &Frame) -> Vec<Region>;
}

impl<T: Detector + ?Sized> Detector for &T {
    fn detect(&self, frame: &Frame) -> Vec<Region> {
        (**self).detect(frame)
    }
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&self, frame: &Frame) -> Vec<Region> {
        (**self).detect(frame)
    }
}

/// One rectangle of a Haar-like feature, in base-window coordinates.
///
/// For a tilted feature `(x, y)` is the top corner of a rectangle rotated by
/// 45°, `width` runs down-right and `height` runs down-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub rects: Vec<WeightedRect>,
    pub tilted: bool,
}

impl Feature {
    /// Weighted sum of the rectangle sums for the window at (`x`, `y`).
    fn response(&self, ii: &IntegralImage, x: u32, y: u32) -> f32 {
        self.rects
            .iter()
            .map(|r| {
                let sum = match (self.tilted, &ii.tilted) {
                    (true, Some(tilted)) => tilted.rect(x + r.x, y + r.y, r.width, r.height),
                    _ => ii.sum(x + r.x, y + r.y, r.width, r.height),
                };
                r.weight * sum as f32
            })
            .sum()
    }
}

/// A split node. Children greater than zero are node indices; zero or
/// negative children `c` select leaf `-c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub feature: usize,
    pub threshold: f32,
    pub left: i32,
    pub right: i32,
}

/// A boosted decision tree; a stump when it has a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct WeakClassifier {
    pub nodes: Vec<Node>,
    pub leaves: Vec<f32>,
}

impl WeakClassifier {
    /// Walk from the root, going left while the normalized feature value is
    /// below the node threshold.
    fn predict(&self, mut value: impl FnMut(usize) -> f64) -> f32 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            let next = if value(node.feature) < node.threshold as f64 {
                node.left
            } else {
                node.right
            };
            if next > 0 {
                idx = next as usize;
            } else {
                return self.leaves[next.unsigned_abs() as usize];
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// A trained boosted cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
    pub features: Vec<Feature>,
}

impl Cascade {
    /// Parse an OpenCV cascade document.
    pub fn from_xml(xml: &str) -> Result<Self, DetectorError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();

        if let Some(legacy) = root
            .children()
            .find(|n| n.attribute("type_id") == Some("opencv-haar-classifier"))
        {
            return Err(DetectorError::UnsupportedCascade(format!(
                "<{}> uses the pre-2.4 haar format; re-save it with opencv_traincascade",
                legacy.tag_name().name()
            )));
        }
        let cascade = child(root, "cascade")?;

        let stage_type = text(child(cascade, "stageType")?);
        let feature_type = text(child(cascade, "featureType")?);
        if stage_type != "BOOST" || feature_type != "HAAR" {
            return Err(DetectorError::UnsupportedCascade(format!(
                "{stage_type}/{feature_type}, only BOOST/HAAR is supported"
            )));
        }

        let stages = items(child(cascade, "stages")?)
            .map(parse_stage)
            .collect::<Result<_, _>>()?;
        let features = items(child(cascade, "features")?)
            .map(parse_feature)
            .collect::<Result<_, _>>()?;

        let parsed = Self {
            window_width: number(&text(child(cascade, "width")?), "width")?,
            window_height: number(&text(child(cascade, "height")?), "height")?,
            stages,
            features,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load and validate a cascade file.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::CascadeNotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| DetectorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_xml(&xml)
    }

    pub fn has_tilted(&self) -> bool {
        self.features.iter().any(|f| f.tilted)
    }

    fn validate(&self) -> Result<(), DetectorError> {
        let (win_w, win_h) = (self.window_width, self.window_height);
        // The variance norm is taken over the window shrunk by one pixel.
        if win_w <= 2 || win_h <= 2 {
            return Err(DetectorError::InvalidCascade(format!(
                "window must be larger than 2x2, got {win_w}x{win_h}"
            )));
        }
        if self.stages.is_empty() {
            return Err(DetectorError::InvalidCascade("no stages".into()));
        }

        for (s, stage) in self.stages.iter().enumerate() {
            for (c, weak) in stage.classifiers.iter().enumerate() {
                let at = format!("stage {s} classifier {c}");
                if weak.nodes.is_empty() || weak.leaves.is_empty() {
                    return Err(DetectorError::InvalidCascade(format!("{at} is empty")));
                }
                for (i, node) in weak.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(DetectorError::InvalidCascade(format!(
                            "{at} node {i} references feature {} of {}",
                            node.feature,
                            self.features.len()
                        )));
                    }
                    for link in [node.left, node.right] {
                        // Forward-only links keep every walk finite.
                        let ok = if link > 0 {
                            (link as usize) > i && (link as usize) < weak.nodes.len()
                        } else {
                            (link.unsigned_abs() as usize) < weak.leaves.len()
                        };
                        if !ok {
                            return Err(DetectorError::InvalidCascade(format!(
                                "{at} node {i} has dangling child {link}"
                            )));
                        }
                    }
                }
            }
        }

        for (f, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(DetectorError::InvalidCascade(format!(
                    "feature {f} has no rectangles"
                )));
            }
            for rect in &feature.rects {
                if !rect_fits(rect, feature.tilted, win_w, win_h) {
                    return Err(DetectorError::InvalidCascade(format!(
                        "feature {f} rectangle {rect:?} exceeds the {win_w}x{win_h} window"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of leading stages the window at (`x`, `y`) passes.
    fn stages_passed(&self, ii: &IntegralImage, x: u32, y: u32) -> usize {
        let inv_norm = ii.inv_norm(x, y, self.window_width, self.window_height);
        for (s, stage) in self.stages.iter().enumerate() {
            let sum: f64 = stage
                .classifiers
                .iter()
                .map(|weak| {
                    weak.predict(|f| self.features[f].response(ii, x, y) as f64 * inv_norm) as f64
                })
                .sum();
            if sum < stage.threshold as f64 - STAGE_THRESHOLD_EPS {
                return s;
            }
        }
        self.stages.len()
    }
}

fn rect_fits(rect: &WeightedRect, tilted: bool, win_w: u32, win_h: u32) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    let right = rect.x.checked_add(rect.width);
    if tilted {
        let bottom = rect
            .y
            .checked_add(rect.width)
            .and_then(|b| b.checked_add(rect.height));
        rect.x >= rect.height
            && right.is_some_and(|r| r <= win_w)
            && bottom.is_some_and(|b| b <= win_h)
    } else {
        let bottom = rect.y.checked_add(rect.height);
        right.is_some_and(|r| r <= win_w) && bottom.is_some_and(|b| b <= win_h)
    }
}

// --- XML helpers ---

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>, DetectorError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| {
            DetectorError::InvalidCascade(format!(
                "<{}> has no <{name}>",
                node.tag_name().name()
            ))
        })
}

/// Sequence entries, written `<_>` by OpenCV's FileStorage.
fn items<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn text(node: roxmltree::Node) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn number<T: FromStr>(token: &str, what: &str) -> Result<T, DetectorError> {
    token
        .parse()
        .map_err(|_| DetectorError::InvalidCascade(format!("bad {what}: {token:?}")))
}

fn parse_stage(node: roxmltree::Node) -> Result<Stage, DetectorError> {
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(parse_weak)
        .collect::<Result<_, _>>()?;
    Ok(Stage {
        threshold: number(&text(child(node, "stageThreshold")?), "stage threshold")?,
        classifiers,
    })
}

fn parse_weak(node: roxmltree::Node) -> Result<WeakClassifier, DetectorError> {
    let raw = text(child(node, "internalNodes")?);
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() % 4 != 0 {
        return Err(DetectorError::UnsupportedCascade(format!(
            "internal nodes of {} values; categorical splits are not supported",
            tokens.len()
        )));
    }
    let nodes = tokens
        .chunks_exact(4)
        .map(|t| {
            Ok(Node {
                left: number(t[0], "left child")?,
                right: number(t[1], "right child")?,
                feature: number(t[2], "feature index")?,
                threshold: number(t[3], "node threshold")?,
            })
        })
        .collect::<Result<_, DetectorError>>()?;
    let leaves = text(child(node, "leafValues")?)
        .split_whitespace()
        .map(|t| number(t, "leaf value"))
        .collect::<Result<_, _>>()?;
    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: roxmltree::Node) -> Result<Feature, DetectorError> {
    let rects = items(child(node, "rects")?)
        .map(|r| {
            let raw = text(r);
            let t: Vec<&str> = raw.split_whitespace().collect();
            if t.len() != 5 {
                return Err(DetectorError::InvalidCascade(format!(
                    "feature rectangle needs 5 values, got {raw:?}"
                )));
            }
            Ok(WeightedRect {
                x: number(t[0], "rect x")?,
                y: number(t[1], "rect y")?,
                width: number(t[2], "rect width")?,
                height: number(t[3], "rect height")?,
                weight: number(t[4], "rect weight")?,
            })
        })
        .collect::<Result<_, _>>()?;
    let tilted = match node.children().find(|n| n.has_tag_name("tilted")) {
        Some(t) => number::<i32>(&text(t), "tilted flag")? != 0,
        None => false,
    };
    Ok(Feature { rects, tilted })
}

/// Tuning for the scale-pyramid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    /// Growth of the search window between pyramid levels (> 1.0).
    pub scale_factor: f32,
    /// A cluster must contain more raw hits than this to be reported.
    /// Zero reports every raw hit ungrouped.
    pub min_neighbors: usize,
    /// Smallest window side considered, in pixels.
    pub min_size: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

/// Cascade-based face detector.
pub struct CascadeDetector {
    cascade: Cascade,
    params: DetectorParams,
    tilted: bool,
}

impl CascadeDetector {
    pub fn new(cascade: Cascade, params: DetectorParams) -> Result<Self, DetectorError> {
        if params.scale_factor.is_nan() || params.scale_factor <= 1.0 {
            return Err(DetectorError::InvalidParameters(format!(
                "scale factor must be greater than 1.0, got {}",
                params.scale_factor
            )));
        }
        let tilted = cascade.has_tilted();
        Ok(Self { cascade, params, tilted })
    }

    /// Load the cascade from `path`.
    pub fn load(path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        let cascade = Cascade::load(path)?;

        tracing::info!(
            path = %path.display(),
            window = ?(cascade.window_width, cascade.window_height),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            scale_factor = params.scale_factor,
            min_neighbors = params.min_neighbors,
            "loaded face cascade"
        );

        Self::new(cascade, params)
    }

    /// Every window that passes all cascade stages, over the whole pyramid,
    /// in frame coordinates.
    fn raw_hits(&self, luma: &GrayImage) -> Vec<Region> {
        let (img_w, img_h) = luma.dimensions();
        let (base_w, base_h) = (self.cascade.window_width, self.cascade.window_height);
        let min_size = self.params.min_size;

        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (base_w as f64 * factor).round() as u32;
            let win_h = (base_h as f64 * factor).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }
            if win_w >= min_size && win_h >= min_size {
                let level_w = (img_w as f64 / factor).round() as u32;
                let level_h = (img_h as f64 / factor).round() as u32;
                if level_w >= base_w && level_h >= base_h {
                    let scaled;
                    let level = if (level_w, level_h) == (img_w, img_h) {
                        luma
                    } else {
                        scaled = imageops::resize(luma, level_w, level_h, FilterType::Triangle);
                        &scaled
                    };
                    self.scan_level(level, factor, (win_w, win_h), &mut hits);
                }
            }
            factor *= self.params.scale_factor as f64;
        }
        hits
    }

    fn scan_level(
        &self,
        level: &GrayImage,
        factor: f64,
        (win_w, win_h): (u32, u32),
        hits: &mut Vec<Region>,
    ) {
        let integral = IntegralImage::new(level, self.tilted);
        let (level_w, level_h) = level.dimensions();
        let (base_w, base_h) = (self.cascade.window_width, self.cascade.window_height);
        let step = if factor > DENSE_SCAN_FACTOR { 1 } else { 2 };
        let all = self.cascade.stages.len();

        let mut y = 0;
        while y + base_h <= level_h {
            let mut x = 0;
            while x + base_w <= level_w {
                match self.cascade.stages_passed(&integral, x, y) {
                    n if n == all => hits.push(Region::new(
                        (x as f64 * factor).round() as u32,
                        (y as f64 * factor).round() as u32,
                        win_w,
                        win_h,
                    )),
                    // Rejected by the first stage: skip the next position too.
                    0 => x += step,
                    _ => {}
                }
                x += step;
            }
            y += step;
        }
    }
}

impl Detector for CascadeDetector {
    fn detect(&self, frame: &Frame) -> Vec<Region> {
        let hits = self.raw_hits(&frame.luma());
        let raw = hits.len();
        let regions = group_regions(hits, self.params.min_neighbors, GROUP_EPS);

        tracing::debug!(
            width = frame.width(),
            height = frame.height(),
            raw_hits = raw,
            faces = regions.len(),
            "cascade detection"
        );

        regions
    }
}

/// Summed-area tables of one pyramid level.
struct IntegralImage {
    stride: usize,
    sum: Vec<i64>,
    sq_sum: Vec<u64>,
    tilted: Option<TiltedIntegral>,
}

impl IntegralImage {
    fn new(img: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];

        for (y, row) in img.as_raw().chunks_exact(w).enumerate() {
            let mut acc = 0i64;
            let mut acc_sq = 0u64;
            for (x, &p) in row.iter().enumerate() {
                acc += p as i64;
                acc_sq += p as u64 * p as u64;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + acc;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + acc_sq;
            }
        }

        Self {
            stride,
            sum,
            sq_sum,
            tilted: with_tilted.then(|| TiltedIntegral::new(img)),
        }
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> i64 {
        let [a, b, c, d] = self.corners(x, y, width, height);
        self.sum[a] - self.sum[b] - self.sum[c] + self.sum[d]
    }

    fn sq_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let [a, b, c, d] = self.corners(x, y, width, height);
        self.sq_sum[a] + self.sq_sum[d] - self.sq_sum[b] - self.sq_sum[c]
    }

    fn corners(&self, x: u32, y: u32, width: u32, height: u32) -> [usize; 4] {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        [
            y0 * self.stride + x0,
            y0 * self.stride + x1,
            y1 * self.stride + x0,
            y1 * self.stride + x1,
        ]
    }

    /// `1 / sqrt(area * Σp² - (Σp)²)` over the window shrunk by one pixel
    /// on every side, or 1 when that is not positive.
    fn inv_norm(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let (nx, ny, nw, nh) = (x + 1, y + 1, width - 2, height - 2);
        let area = nw as f64 * nh as f64;
        let s = self.sum(nx, ny, nw, nh) as f64;
        let sq = self.sq_sum(nx, ny, nw, nh) as f64;
        let nf = area * sq - s * s;
        1.0 / if nf > 0.0 { nf.sqrt() } else { 1.0 }
    }
}

/// Rotated summed-area table.
///
/// `T(X, Y)` sums every pixel `(x, y)` with `y < Y` and
/// `|x - X + 1| <= Y - y - 1`: the triangle opening upward from just
/// above-left of `(X, Y)`. Columns are padded by `pad` on both sides so the
/// recurrence never reads outside the table; padded entries hold exact
/// values, which are zero there.
struct TiltedIntegral {
    stride: usize,
    pad: usize,
    table: Vec<i64>,
}

impl TiltedIntegral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let pad = h + 2;
        let stride = w + 1 + 2 * pad;
        let mut table = vec![0i64; stride * (h + 1)];

        let pixel = |x: isize, y: isize| -> i64 {
            if x < 0 || y < 0 || x as usize >= w || y as usize >= h {
                0
            } else {
                img.as_raw()[y as usize * w + x as usize] as i64
            }
        };

        for row in 1..=h {
            for col in 0..stride {
                let up_left = if col > 0 { table[(row - 1) * stride + col - 1] } else { 0 };
                let up_right = if col + 1 < stride { table[(row - 1) * stride + col + 1] } else { 0 };
                let up2 = if row >= 2 { table[(row - 2) * stride + col] } else { 0 };
                let x = col as isize - pad as isize - 1;
                let y = row as isize - 1;
                table[row * stride + col] = up_left + up_right - up2 + pixel(x, y) + pixel(x, y - 1);
            }
        }

        Self { stride, pad, table }
    }

    fn at(&self, x: usize, y: usize) -> i64 {
        self.table[y * self.stride + x + self.pad]
    }

    /// Sum over the 45° rectangle with top corner (`x`, `y`).
    fn rect(&self, x: u32, y: u32, width: u32, height: u32) -> i64 {
        let (x, y, w, h) = (x as usize, y as usize, width as usize, height as usize);
        self.at(x, y) - self.at(x - h, y + h) - self.at(x + w, y + w)
            + self.at(x + w - h, y + w + h)
    }
}

/// Cluster raw hits and average each cluster into one region.
///
/// Two hits are neighbors when every edge lies within `eps` of their mean
/// size; clusters are the transitive closure of that relation. Clusters
/// with `min_neighbors` or fewer hits are dropped, as is any cluster lying
/// inside a larger kept one that is better supported. Output order follows
/// the first hit of each cluster. With `min_neighbors == 0` the raw hits
/// are returned unchanged.
fn group_regions(hits: Vec<Region>, min_neighbors: usize, eps: f64) -> Vec<Region> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits;
    }

    let n = hits.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&hits[i], &hits[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }

    // Label clusters in order of their first hit.
    let mut label = vec![usize::MAX; n];
    let mut totals: Vec<(usize, [u64; 4])> = Vec::new();
    for (i, hit) in hits.iter().enumerate() {
        let root = find(&mut parent, i);
        if label[root] == usize::MAX {
            label[root] = totals.len();
            totals.push((0, [0; 4]));
        }
        let (count, sums) = &mut totals[label[root]];
        *count += 1;
        sums[0] += hit.x as u64;
        sums[1] += hit.y as u64;
        sums[2] += hit.width as u64;
        sums[3] += hit.height as u64;
    }

    let clusters: Vec<(usize, Region)> = totals
        .into_iter()
        .map(|(count, s)| {
            let avg = |total: u64| (total as f64 / count as f64).round() as u32;
            (count, Region::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3])))
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(_, (n1, _))| *n1 > min_neighbors)
        .filter(|&(i, &(n1, r1))| {
            !clusters.iter().enumerate().any(|(j, &(n2, r2))| {
                j != i
                    && n2 > min_neighbors
                    && encloses(&r2, &r1, eps)
                    && (n2 > n1.max(3) || n1 < 3)
            })
        })
        .map(|(_, &(_, r))| r)
        .collect()
}

fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// `outer`, widened by `eps` of its size, contains `inner`.
fn encloses(outer: &Region, inner: &Region, eps: f64) -> bool {
    let dx = (outer.width as f64 * eps).round() as i64;
    let dy = (outer.height as f64 * eps).round() as i64;
    let (ox, oy) = (outer.x as i64, outer.y as i64);
    inner.x as i64 >= ox - dx
        && inner.y as i64 >= oy - dy
        && inner.right() as i64 <= outer.right() as i64 + dx
        && inner.bottom() as i64 <= outer.bottom() as i64 + dy
}
