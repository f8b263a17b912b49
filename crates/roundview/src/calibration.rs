//! Fisheye camera calibration: entities, file parsers and discovery.
//!
//! Two on-disk formats are supported, both produced by the calibration
//! tooling:
//!
//! - per-camera text files, one `key value` pair per line (`#` starts
//!   a comment), keys named after the fields below with `w`/`h` for
//!   the image size;
//! - an aggregated JSON file `camera_calibration_<model>.json` holding
//!   every camera's fisheye parameters in one document.
//!
//! The directory holding the files is discovered through the
//! `FISHEYE_CONFIG_PATH` environment variable.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

/// Environment variable naming the calibration directory.
pub const CONFIG_ENV_VAR: &str = "FISHEYE_CONFIG_PATH";

/// Pinhole-equivalent intrinsics of one fisheye camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsic {
    /// Focal length along X (pixels).
    pub fx: f32,
    /// Focal length along Y (pixels).
    pub fy: f32,
    /// Principal point X (pixels).
    pub cx: f32,
    /// Principal point Y (pixels).
    pub cy: f32,
    /// Sensor image width (pixels).
    pub width: u32,
    /// Sensor image height (pixels).
    pub height: u32,
    /// Diagonal field of view (degrees).
    pub fov: f32,
    /// Axis skew (typically 0).
    pub skew: f32,
    /// `true` when the sensor is mounted upside down.
    pub flip: bool,
}

/// Mounting pose of one camera in the rig frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraExtrinsic {
    /// Rotation about Z (degrees).
    pub yaw: f32,
    /// Rotation about Y (degrees).
    pub pitch: f32,
    /// Rotation about X (degrees).
    pub roll: f32,
    /// Translation along X (millimetres).
    pub trans_x: f32,
    /// Translation along Y (millimetres).
    pub trans_y: f32,
    /// Translation along Z (millimetres).
    pub trans_z: f32,
}

/// Intrinsic and extrinsic calibration of one camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInfo {
    pub intrinsic: CameraIntrinsic,
    pub extrinsic: CameraExtrinsic,
}

/// Full fisheye description: calibration plus the image circle and the
/// equidistant distortion polynomial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FisheyeInfo {
    pub intrinsic: CameraIntrinsic,
    pub extrinsic: CameraExtrinsic,
    /// Radius of the valid image circle (pixels).
    pub radius: f32,
    /// Distortion polynomial coefficients k1..k4.
    pub distort_coeff: [f32; 4],
}

/// Errors from calibration discovery and parsing.
#[derive(Debug)]
pub enum CalibError {
    /// `FISHEYE_CONFIG_PATH` is unset or empty.
    EnvUnset,
    /// A calibration file could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A line of a text calibration file did not parse.
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// A required key never appeared in the file.
    MissingKey { path: PathBuf, key: &'static str },
    /// The aggregated JSON file did not parse.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for CalibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvUnset => {
                write!(f, "{CONFIG_ENV_VAR} is empty, export {CONFIG_ENV_VAR} first")
            }
            Self::Io { path, source } => {
                write!(f, "cannot read calibration file {}: {source}", path.display())
            }
            Self::Parse {
                path,
                line,
                message,
            } => write!(f, "{}:{line}: {message}", path.display()),
            Self::MissingKey { path, key } => {
                write!(f, "{}: missing required key `{key}`", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "{}: invalid calibration JSON: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for CalibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Resolve the calibration directory from `FISHEYE_CONFIG_PATH`.
pub fn config_dir_from_env() -> Result<PathBuf, CalibError> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(CalibError::EnvUnset),
    }
}

/// Key/value lines of one calibration text file, comments stripped.
fn parse_lines(path: &Path, text: &str) -> Result<Vec<(usize, String, f32)>, CalibError> {
    let mut pairs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let key = tokens.next().expect("non-empty line has a first token");
        let value = tokens.next().ok_or_else(|| CalibError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            message: format!("key `{key}` has no value"),
        })?;

        // `flip` is boolean in the text format; normalise to 0/1.
        let number = match value {
            "true" => 1.0,
            "false" => 0.0,
            other => other.parse::<f32>().map_err(|_| CalibError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message: format!("value `{other}` of key `{key}` is not a number"),
            })?,
        };
        pairs.push((idx + 1, key.to_string(), number));
    }
    Ok(pairs)
}

fn require(
    path: &Path,
    value: Option<f32>,
    key: &'static str,
) -> Result<f32, CalibError> {
    value.ok_or(CalibError::MissingKey {
        path: path.to_path_buf(),
        key,
    })
}

/// Parse a per-camera intrinsic text file.
pub fn parse_intrinsic_file(path: &Path) -> Result<CameraIntrinsic, CalibError> {
    let text = fs::read_to_string(path).map_err(|source| CalibError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut fx = None;
    let mut fy = None;
    let mut cx = None;
    let mut cy = None;
    let mut width = None;
    let mut height = None;
    let mut fov = None;
    let mut skew = None;
    let mut flip = None;

    for (line, key, value) in parse_lines(path, &text)? {
        match key.as_str() {
            "fx" => fx = Some(value),
            "fy" => fy = Some(value),
            "cx" => cx = Some(value),
            "cy" => cy = Some(value),
            "w" | "width" => width = Some(value),
            "h" | "height" => height = Some(value),
            "fov" => fov = Some(value),
            "skew" => skew = Some(value),
            "flip" => flip = Some(value),
            other => {
                tracing::debug!("{}:{line}: ignoring unknown key `{other}`", path.display());
            }
        }
    }

    Ok(CameraIntrinsic {
        fx: require(path, fx, "fx")?,
        fy: require(path, fy, "fy")?,
        cx: require(path, cx, "cx")?,
        cy: require(path, cy, "cy")?,
        width: require(path, width, "w")? as u32,
        height: require(path, height, "h")? as u32,
        fov: fov.unwrap_or(0.0),
        skew: skew.unwrap_or(0.0),
        flip: flip.unwrap_or(0.0) != 0.0,
    })
}

/// Parse a per-camera extrinsic text file.
pub fn parse_extrinsic_file(path: &Path) -> Result<CameraExtrinsic, CalibError> {
    let text = fs::read_to_string(path).map_err(|source| CalibError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut yaw = None;
    let mut pitch = None;
    let mut roll = None;
    let mut trans_x = None;
    let mut trans_y = None;
    let mut trans_z = None;

    for (line, key, value) in parse_lines(path, &text)? {
        match key.as_str() {
            "yaw" => yaw = Some(value),
            "pitch" => pitch = Some(value),
            "roll" => roll = Some(value),
            "trans_x" => trans_x = Some(value),
            "trans_y" => trans_y = Some(value),
            "trans_z" => trans_z = Some(value),
            other => {
                tracing::debug!("{}:{line}: ignoring unknown key `{other}`", path.display());
            }
        }
    }

    Ok(CameraExtrinsic {
        yaw: require(path, yaw, "yaw")?,
        pitch: require(path, pitch, "pitch")?,
        roll: require(path, roll, "roll")?,
        trans_x: require(path, trans_x, "trans_x")?,
        trans_y: require(path, trans_y, "trans_y")?,
        trans_z: require(path, trans_z, "trans_z")?,
    })
}

/// Load intrinsic/extrinsic pairs for every camera from `dir`.
pub fn load_calibrations(
    dir: &Path,
    intrinsic_names: &[String],
    extrinsic_names: &[String],
) -> Result<Vec<CalibrationInfo>, CalibError> {
    debug_assert_eq!(intrinsic_names.len(), extrinsic_names.len());

    let mut infos = Vec::with_capacity(intrinsic_names.len());
    for (intr, extr) in intrinsic_names.iter().zip(extrinsic_names) {
        let intrinsic = parse_intrinsic_file(&dir.join(intr))?;
        let extrinsic = parse_extrinsic_file(&dir.join(extr))?;
        infos.push(CalibrationInfo {
            intrinsic,
            extrinsic,
        });
    }
    tracing::info!("loaded calibration for {} cameras from {}", infos.len(), dir.display());
    Ok(infos)
}

/// Shift every camera so the rig's mean X,Y sits at the bowl origin.
///
/// Returns the subtracted offset. Averaging covers however many
/// cameras are configured, not a fixed four.
pub fn centralize_extrinsics(infos: &mut [CalibrationInfo]) -> [f32; 2] {
    if infos.is_empty() {
        return [0.0, 0.0];
    }
    let n = infos.len() as f32;
    let offset_x = infos.iter().map(|i| i.extrinsic.trans_x).sum::<f32>() / n;
    let offset_y = infos.iter().map(|i| i.extrinsic.trans_y).sum::<f32>() / n;
    for info in infos.iter_mut() {
        info.extrinsic.trans_x -= offset_x;
        info.extrinsic.trans_y -= offset_y;
    }
    [offset_x, offset_y]
}

// ── Aggregated JSON format ─────────────────────────────────────────────

fn bool_from_json<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flip {
        Bool(bool),
        Text(String),
    }
    match Flip::deserialize(de)? {
        Flip::Bool(b) => Ok(b),
        Flip::Text(s) => match s.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "`{other}` is not a boolean"
            ))),
        },
    }
}

#[derive(Debug, Deserialize)]
struct JsonExtrinsic {
    #[serde(default)]
    yaw: f32,
    #[serde(default)]
    pitch: f32,
    #[serde(default)]
    roll: f32,
    #[serde(default)]
    trans_x: f32,
    #[serde(default)]
    trans_y: f32,
    #[serde(default)]
    trans_z: f32,
}

#[derive(Debug, Deserialize)]
struct JsonCamera {
    radius: f32,
    w: u32,
    h: u32,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
    #[serde(default)]
    skew: f32,
    #[serde(default)]
    fov: f32,
    #[serde(default, deserialize_with = "bool_from_json")]
    flip: bool,
    #[serde(rename = "D", default)]
    d: Vec<f32>,
    #[serde(default)]
    e: Option<JsonExtrinsic>,
}

#[derive(Debug, Deserialize)]
struct JsonCameraList {
    camera: Vec<JsonCamera>,
}

#[derive(Debug, Deserialize)]
struct JsonRoot {
    cameras: JsonCameraList,
}

/// Parse an aggregated `camera_calibration_<model>.json` file into
/// per-camera fisheye descriptions.
pub fn parse_fisheye_json_file(path: &Path) -> Result<Vec<FisheyeInfo>, CalibError> {
    let text = fs::read_to_string(path).map_err(|source| CalibError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: JsonRoot = serde_json::from_str(&text).map_err(|source| CalibError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let infos = root
        .cameras
        .camera
        .into_iter()
        .map(|cam| {
            let mut distort_coeff = [0.0f32; 4];
            for (dst, src) in distort_coeff.iter_mut().zip(&cam.d) {
                *dst = *src;
            }
            let extrinsic = cam
                .e
                .map(|e| CameraExtrinsic {
                    yaw: e.yaw,
                    pitch: e.pitch,
                    roll: e.roll,
                    trans_x: e.trans_x,
                    trans_y: e.trans_y,
                    trans_z: e.trans_z,
                })
                .unwrap_or_default();
            FisheyeInfo {
                intrinsic: CameraIntrinsic {
                    fx: cam.fx,
                    fy: cam.fy,
                    cx: cam.cx,
                    cy: cam.cy,
                    width: cam.w,
                    height: cam.h,
                    fov: cam.fov,
                    skew: cam.skew,
                    flip: cam.flip,
                },
                extrinsic,
                radius: cam.radius,
                distort_coeff,
            }
        })
        .collect();
    Ok(infos)
}
