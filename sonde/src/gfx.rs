//! Graphics output.
//!
//! Tiles are 8x8 grids of palette indices. `!save` turns tiles, tilesets,
//! palettes and images into PNG files under the output directory, one file
//! per saved value, named after the value's path. Structs and plain lists
//! save their children recursively.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use png::{BitDepth, ColorType, Encoder};

use crate::core::value::{TileValue, Value, ValueKind};
use crate::core::{ArrayKind, TileFormat};

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    /// The value has no graphical form.
    Unsupported(String),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Io(error) => write!(f, "{error}"),
            SaveError::Unsupported(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<std::io::Error> for SaveError {
    fn from(error: std::io::Error) -> Self {
        SaveError::Io(error)
    }
}

impl From<png::EncodingError> for SaveError {
    fn from(error: png::EncodingError) -> Self {
        match error {
            png::EncodingError::IoError(error) => SaveError::Io(error),
            error => SaveError::Unsupported(error.to_string()),
        }
    }
}

/// Decode one tile's worth of bytes into 64 row-major palette indices.
/// The leftmost pixel sits in the most significant bit of each plane byte.
pub fn decode_tile(format: TileFormat, data: &[u8]) -> Vec<u8> {
    let mut pixels = vec![0u8; 64];
    match format {
        // Every row's planes are stored together: row 0 plane 0, row 0
        // plane 1, row 1 plane 0, ...
        TileFormat::Planar { depth } => {
            let mut i = 0;
            for y in 0..8 {
                for plane in 0..depth {
                    let byte = data[i];
                    i += 1;
                    for x in 0..8 {
                        pixels[y * 8 + x] |= ((byte >> (7 - x)) & 1) << plane;
                    }
                }
            }
        }
        // Whole-tile planes: all of plane 0, then all of plane 1.
        TileFormat::PlanarComposite { depth } => {
            let mut i = 0;
            for plane in 0..depth {
                for y in 0..8 {
                    let byte = data[i];
                    i += 1;
                    for x in 0..8 {
                        pixels[y * 8 + x] |= ((byte >> (7 - x)) & 1) << plane;
                    }
                }
            }
        }
    }
    pixels
}

/// Save a value under `output_dir`, named by its dotted path.
pub fn save_value(value: &Value, output_dir: &Path, path: &[String]) -> Result<(), SaveError> {
    match &value.kind {
        ValueKind::Tile(tile) => save_tile(tile, output_dir, path),
        ValueKind::Array { items, kind } => match kind {
            ArrayKind::Tileset => save_tileset(items, None, output_dir, path),
            ArrayKind::Palette => save_palette(items, output_dir, path),
            _ => save_each(items, output_dir, path),
        },
        ValueKind::Image { tiles, palette } => {
            let tiles = match &tiles.kind {
                ValueKind::Array { items, .. } => items,
                _ => return Err(SaveError::Unsupported("image tiles are not a list".into())),
            };
            save_tileset(tiles, Some(palette), output_dir, path)
        }
        ValueKind::Struct(fields) => {
            for (name, child) in &fields.fields {
                let mut child_path = path.to_vec();
                child_path.push(name.clone());
                save_value(child, output_dir, &child_path)?;
            }
            Ok(())
        }
        _ => Err(SaveError::Unsupported(format!(
            "`{}` has no graphical form to save",
            path.join(".")
        ))),
    }
}

fn save_each(items: &[Value], output_dir: &Path, path: &[String]) -> Result<(), SaveError> {
    for (i, item) in items.iter().enumerate() {
        let mut child_path = path.to_vec();
        child_path.push(i.to_string());
        save_value(item, output_dir, &child_path)?;
    }
    Ok(())
}

fn open_png(output_dir: &Path, path: &[String]) -> Result<BufWriter<File>, SaveError> {
    let mut file_path = PathBuf::from(output_dir);
    for segment in path {
        file_path.push(segment);
    }
    file_path.set_extension("png");
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(file_path)?))
}

fn bit_depth(depth: u8) -> Result<BitDepth, SaveError> {
    match depth {
        1 => Ok(BitDepth::One),
        2 => Ok(BitDepth::Two),
        3 | 4 => Ok(BitDepth::Four),
        5..=8 => Ok(BitDepth::Eight),
        depth => Err(SaveError::Unsupported(format!(
            "cannot write {depth}-bit PNGs"
        ))),
    }
}

/// Pack one scanline of palette indices at a sub-byte depth, leftmost pixel
/// in the most significant bits, as PNG wants it.
fn pack_row(pixels: &[u8], depth: BitDepth) -> Vec<u8> {
    let bits = match depth {
        BitDepth::One => 1,
        BitDepth::Two => 2,
        BitDepth::Four => 4,
        _ => return pixels.to_vec(),
    };
    let mut out = Vec::with_capacity((pixels.len() * bits + 7) / 8);
    let mut acc = 0u8;
    let mut filled = 0;
    for pixel in pixels {
        acc = (acc << bits) | (pixel & ((1 << bits) - 1));
        filled += bits;
        if filled == 8 {
            out.push(acc);
            acc = 0;
            filled = 0;
        }
    }
    if filled > 0 {
        out.push(acc << (8 - filled));
    }
    out
}

fn save_tile(tile: &TileValue, output_dir: &Path, path: &[String]) -> Result<(), SaveError> {
    let writer = open_png(output_dir, path)?;
    let depth = bit_depth(tile.depth)?;
    let mut encoder = Encoder::new(writer, 8, 8);
    encoder.set_color(ColorType::Grayscale);
    encoder.set_depth(depth);
    let mut writer = encoder.write_header()?;
    let mut data = Vec::new();
    for y in 0..8 {
        data.extend(pack_row(&tile.pixels[y * 8..y * 8 + 8], depth));
    }
    writer.write_image_data(&data)?;
    Ok(())
}

/// A flat tileset saves one PNG per tile; a tileset of tilesets is a grid
/// with one inner tileset per row, optionally colored through a palette.
fn save_tileset(
    items: &[Value],
    palette: Option<&Value>,
    output_dir: &Path,
    path: &[String],
) -> Result<(), SaveError> {
    let rows: Vec<&[Value]> = match items.first().map(|item| &item.kind) {
        None => return Ok(()),
        Some(ValueKind::Tile(_)) => {
            if palette.is_none() {
                return save_each(items, output_dir, path);
            }
            // With a palette, a flat tileset renders as a single column.
            items
                .iter()
                .map(std::slice::from_ref)
                .collect()
        }
        Some(ValueKind::Array { .. }) => items
            .iter()
            .map(|row| row.items().unwrap_or(&[]))
            .collect(),
        Some(_) => {
            return Err(SaveError::Unsupported(
                "tilesets may only contain tiles".into(),
            ))
        }
    };

    let tiles_wide = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    if tiles_wide == 0 {
        return Ok(());
    }
    let width = (tiles_wide * 8) as u32;
    let height = (rows.len() * 8) as u32;

    let mut depth = 1;
    let mut grid: Vec<Vec<&TileValue>> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut tiles = Vec::with_capacity(row.len());
        for item in *row {
            match &item.kind {
                ValueKind::Tile(tile) => {
                    depth = depth.max(tile.depth);
                    tiles.push(tile);
                }
                _ => {
                    return Err(SaveError::Unsupported(
                        "tilesets may only contain tiles".into(),
                    ))
                }
            }
        }
        grid.push(tiles);
    }

    let writer = open_png(output_dir, path)?;
    let mut encoder = Encoder::new(writer, width, height);
    let png_depth = match palette {
        Some(palette) => {
            encoder.set_color(ColorType::Indexed);
            encoder.set_depth(BitDepth::Eight);
            encoder.set_palette(palette_bytes(palette)?);
            BitDepth::Eight
        }
        None => {
            let png_depth = bit_depth(depth)?;
            encoder.set_color(ColorType::Grayscale);
            encoder.set_depth(png_depth);
            png_depth
        }
    };
    let mut writer = encoder.write_header()?;

    let blank = [0u8; 8];
    let mut data = Vec::new();
    for row in &grid {
        for y in 0..8 {
            let mut scanline = Vec::with_capacity(tiles_wide * 8);
            for x in 0..tiles_wide {
                match row.get(x) {
                    Some(tile) => scanline.extend_from_slice(&tile.pixels[y * 8..y * 8 + 8]),
                    None => scanline.extend_from_slice(&blank),
                }
            }
            data.extend(pack_row(&scanline, png_depth));
        }
    }
    writer.write_image_data(&data)?;
    Ok(())
}

/// Flatten color structs into RGB triples, scaled to 8 bits via their
/// `max` field.
fn palette_bytes(palette: &Value) -> Result<Vec<u8>, SaveError> {
    let items = palette.items().ok_or_else(|| {
        SaveError::Unsupported("palettes must be lists of colors".into())
    })?;
    let mut bytes = Vec::with_capacity(items.len() * 3);
    for color in items {
        let channel = |name: &str| -> Result<i64, SaveError> {
            color
                .get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| {
                    SaveError::Unsupported(format!("color is missing its `{name}` field"))
                })
        };
        let max = channel("max")?.max(1);
        for name in ["r", "g", "b"] {
            let value = channel(name)?;
            bytes.push((value * 255 / max).clamp(0, 255) as u8);
        }
    }
    Ok(bytes)
}

/// Palettes save as a one-pixel-tall RGB strip.
fn save_palette(items: &[Value], output_dir: &Path, path: &[String]) -> Result<(), SaveError> {
    if items.is_empty() {
        return Ok(());
    }
    let strip = Value::new(ValueKind::Array {
        items: items.to_vec(),
        kind: ArrayKind::Palette,
    });
    let bytes = palette_bytes(&strip)?;
    let writer = open_png(output_dir, path)?;
    let mut encoder = Encoder::new(writer, items.len() as u32, 1);
    encoder.set_color(ColorType::Rgb);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_tiles_interleave_planes_per_row() {
        // Row 0: plane 0 = 0b10000000, plane 1 = 0b00000001.
        let mut data = vec![0u8; 16];
        data[0] = 0b1000_0000;
        data[1] = 0b0000_0001;
        let pixels = decode_tile(TileFormat::Planar { depth: 2 }, &data);
        assert_eq!(pixels[0], 1);
        assert_eq!(pixels[7], 2);
        assert!(pixels[8..].iter().all(|pixel| *pixel == 0));
    }

    #[test]
    fn composite_tiles_store_whole_planes() {
        // Plane 0 covers bytes 0..8, plane 1 bytes 8..16.
        let mut data = vec![0u8; 16];
        data[0] = 0b1000_0000;
        data[8] = 0b1000_0000;
        let pixels = decode_tile(TileFormat::PlanarComposite { depth: 2 }, &data);
        assert_eq!(pixels[0], 3);
    }

    #[test]
    fn rows_pack_most_significant_first() {
        let packed = pack_row(&[1, 0, 0, 0, 0, 0, 0, 1], BitDepth::One);
        assert_eq!(packed, vec![0b1000_0001]);
        let packed = pack_row(&[3, 0, 0, 1], BitDepth::Two);
        assert_eq!(packed, vec![0b1100_0001]);
    }

    #[test]
    fn tiles_write_png_files() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileValue {
            depth: 2,
            pixels: vec![0; 64],
        };
        save_tile(&tile, dir.path(), &["gfx".to_owned(), "tile".to_owned()]).unwrap();
        assert!(dir.path().join("gfx/tile.png").is_file());
    }
}
