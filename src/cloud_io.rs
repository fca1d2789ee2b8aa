//! Point cloud artifacts on disk.
//!
//! `.ply`: reads the `vertex` element's x, y, z from ascii, binary_little_endian or
//! binary_big_endian files with any scalar property types; writes binary_little_endian
//! doubles. `.xyz`: one whitespace-separated `x y z` per line.
//!
//! Writes go to a sibling temporary file that is renamed into place, so a failed write
//! never leaves a partial artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{CloudError, Result};
use crate::point_set::PointSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudFormat {
    Ply,
    Xyz,
}

impl CloudFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("ply") => Ok(CloudFormat::Ply),
            Some("xyz") | Some("txt") => Ok(CloudFormat::Xyz),
            _ => Err(CloudError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

pub fn read_point_set(path: impl AsRef<Path>) -> Result<PointSet> {
    let path = path.as_ref();
    let format = CloudFormat::from_path(path)?;
    let bytes = fs::read(path).map_err(|e| CloudError::io(path, e))?;
    let points = match format {
        CloudFormat::Ply => parse_ply(path, &bytes)?,
        CloudFormat::Xyz => parse_xyz(path, &bytes)?,
    };
    debug!("read {} points from {}", points.len(), path.display());
    Ok(points)
}

pub fn write_point_set(path: impl AsRef<Path>, points: &PointSet) -> Result<()> {
    let path = path.as_ref();
    let bytes = match CloudFormat::from_path(path)? {
        CloudFormat::Ply => encode_ply(points),
        CloudFormat::Xyz => encode_xyz(points),
    };
    write_atomically(path, &bytes)?;
    debug!("wrote {} points to {}", points.len(), path.display());
    Ok(())
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it over `path`.
/// Missing parent directories are created.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CloudError::io(parent, e))?;
    }
    let tmp = temporary_sibling(path);
    let result = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(CloudError::io(path, e));
    }
    Ok(())
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyEncoding {
    Ascii,
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    fn decode(self, raw: &[u8], encoding: PlyEncoding) -> f64 {
        macro_rules! read {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&raw[..$n]);
                if encoding == PlyEncoding::BigEndian {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }
        match self {
            ScalarType::I8 => read!(i8, 1),
            ScalarType::U8 => read!(u8, 1),
            ScalarType::I16 => read!(i16, 2),
            ScalarType::U16 => read!(u16, 2),
            ScalarType::I32 => read!(i32, 4),
            ScalarType::U32 => read!(u32, 4),
            ScalarType::F32 => read!(f32, 4),
            ScalarType::F64 => read!(f64, 8),
        }
    }
}

struct PlyHeader {
    encoding: PlyEncoding,
    vertex_count: usize,
    properties: Vec<(String, ScalarType)>,
    body_offset: usize,
}

fn parse_ply_header(path: &Path, bytes: &[u8]) -> Result<PlyHeader> {
    const END: &[u8] = b"end_header";
    let end = bytes
        .windows(END.len())
        .position(|w| w == END)
        .ok_or_else(|| CloudError::format(path, "missing end_header"))?;
    let mut body_offset = end + END.len();
    // The header ends at the line break after `end_header` (\n or \r\n).
    if bytes.get(body_offset) == Some(&b'\r') {
        body_offset += 1;
    }
    if bytes.get(body_offset) == Some(&b'\n') {
        body_offset += 1;
    }

    let header = std::str::from_utf8(&bytes[..end])
        .map_err(|_| CloudError::format(path, "header is not valid text"))?;
    let mut lines = header.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err(CloudError::format(path, "missing ply magic"));
    }

    let mut encoding = None;
    let mut vertex_count = None;
    let mut properties = Vec::new();
    let mut in_vertex = false;

    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["format", kind, _version] => {
                encoding = Some(match *kind {
                    "ascii" => PlyEncoding::Ascii,
                    "binary_little_endian" => PlyEncoding::LittleEndian,
                    "binary_big_endian" => PlyEncoding::BigEndian,
                    other => {
                        return Err(CloudError::format(path, format!("unknown format {other}")))
                    }
                });
            }
            ["element", name, count] => {
                let count: usize = count
                    .parse()
                    .map_err(|_| CloudError::format(path, format!("bad element count {count}")))?;
                if *name == "vertex" {
                    vertex_count = Some(count);
                    in_vertex = true;
                } else {
                    if vertex_count.is_none() && count > 0 {
                        return Err(CloudError::format(
                            path,
                            format!("element {name} precedes vertex"),
                        ));
                    }
                    in_vertex = false;
                }
            }
            ["property", "list", ..] if in_vertex => {
                return Err(CloudError::format(path, "list properties on vertex"));
            }
            ["property", ty, name] if in_vertex => {
                let ty = ScalarType::parse(ty)
                    .ok_or_else(|| CloudError::format(path, format!("unknown type {ty}")))?;
                properties.push((name.to_string(), ty));
            }
            _ => {}
        }
    }

    Ok(PlyHeader {
        encoding: encoding.ok_or_else(|| CloudError::format(path, "missing format line"))?,
        vertex_count: vertex_count
            .ok_or_else(|| CloudError::format(path, "missing vertex element"))?,
        properties,
        body_offset,
    })
}

fn parse_ply(path: &Path, bytes: &[u8]) -> Result<PointSet> {
    let header = parse_ply_header(path, bytes)?;
    let axis_slot = |axis: &str| {
        header
            .properties
            .iter()
            .position(|(name, _)| name == axis)
            .ok_or_else(|| CloudError::format(path, format!("vertex has no {axis} property")))
    };
    let slots = [axis_slot("x")?, axis_slot("y")?, axis_slot("z")?];
    let body = &bytes[header.body_offset..];

    let coords = match header.encoding {
        PlyEncoding::Ascii => {
            // Every ascii vertex row takes at least six bytes.
            let mut coords = Vec::with_capacity(header.vertex_count.min(body.len() / 6) * 3);
            let text = std::str::from_utf8(body)
                .map_err(|_| CloudError::format(path, "ascii body is not valid text"))?;
            let mut rows = text.lines().filter(|l| !l.trim().is_empty());
            for i in 0..header.vertex_count {
                let row = rows
                    .next()
                    .ok_or_else(|| CloudError::format(path, format!("missing vertex {i}")))?;
                let fields: Vec<&str> = row.split_whitespace().collect();
                for &slot in &slots {
                    let value = fields
                        .get(slot)
                        .and_then(|f| f.parse::<f64>().ok())
                        .ok_or_else(|| CloudError::format(path, format!("bad vertex {i}")))?;
                    coords.push(value);
                }
            }
            coords
        }
        encoding => {
            let offsets: Vec<usize> = header
                .properties
                .iter()
                .scan(0, |offset, (_, ty)| {
                    let here = *offset;
                    *offset += ty.size();
                    Some(here)
                })
                .collect();
            let stride: usize = header.properties.iter().map(|(_, ty)| ty.size()).sum();
            let needed = stride.checked_mul(header.vertex_count).ok_or_else(|| {
                CloudError::format(
                    path,
                    format!("vertex count {} overflows the body size", header.vertex_count),
                )
            })?;
            if body.len() < needed {
                return Err(CloudError::format(
                    path,
                    format!("truncated body: {} of {} bytes", body.len(), needed),
                ));
            }
            let mut coords = Vec::with_capacity(header.vertex_count * 3);
            for row in body[..needed].chunks_exact(stride) {
                for &slot in &slots {
                    let ty = header.properties[slot].1;
                    coords.push(ty.decode(&row[offsets[slot]..], encoding));
                }
            }
            coords
        }
    };

    PointSet::from_flat(coords).map_err(|e| CloudError::format(path, e.to_string()))
}

fn encode_ply(points: &PointSet) -> Vec<u8> {
    let header = format!(
        "ply\nformat binary_little_endian 1.0\ncomment pointcloud-denoise-tools\nelement vertex {}\nproperty double x\nproperty double y\nproperty double z\nend_header\n",
        points.len()
    );
    let mut bytes = Vec::with_capacity(header.len() + points.as_flat().len() * 8);
    bytes.extend_from_slice(header.as_bytes());
    for &c in points.as_flat() {
        bytes.extend_from_slice(&c.to_le_bytes());
    }
    bytes
}

fn parse_xyz(path: &Path, bytes: &[u8]) -> Result<PointSet> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| CloudError::format(path, "file is not valid text"))?;
    let mut coords = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        for _ in 0..3 {
            let value = fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .ok_or_else(|| CloudError::format(path, format!("bad line {}", line_no + 1)))?;
            coords.push(value);
        }
    }
    PointSet::from_flat(coords).map_err(|e| CloudError::format(path, e.to_string()))
}

fn encode_xyz(points: &PointSet) -> Vec<u8> {
    let mut text = String::with_capacity(points.len() * 48);
    for p in points.iter() {
        // `Display` for f64 prints the shortest string that parses back exactly.
        text.push_str(&format!("{} {} {}\n", p[0], p[1], p[2]));
    }
    text.into_bytes()
}
