// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Colorspace conversion collaborator.
//!
//! The engine decodes into, and encodes from, NV12 in its native tiled
//! layout: each plane is cut into 64x32 byte tiles stored one after the
//! other, tile rows top to bottom. [`ColorConverter`] moves frames between
//! that layout and the linear formats a host asks for.

use serde::{Deserialize, Serialize};

use crate::Error;

pub const TILE_WIDTH: usize = 64;
pub const TILE_HEIGHT: usize = 32;
const TILE_SIZE: usize = TILE_WIDTH * TILE_HEIGHT;

/// Raw picture layouts a port may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Engine-native tiled NV12
    Nv12Tiled,
    /// Linear NV12 (Y plane, interleaved UV plane)
    Nv12,
    /// Linear I420 (Y, U and V planes)
    Yuv420Planar,
}

impl PixelFormat {
    /// Bytes needed for one `width` x `height` frame.
    pub fn frame_size(self, width: usize, height: usize) -> usize {
        match self {
            PixelFormat::Nv12Tiled => {
                tiled_plane_size(width, height) + tiled_plane_size(width, half(height))
            }
            PixelFormat::Nv12 | PixelFormat::Yuv420Planar => {
                width * height + 2 * half(width) * half(height)
            }
        }
    }
}

fn align(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

fn half(value: usize) -> usize {
    (value + 1) / 2
}

/// Size of one tiled plane covering `width` x `height` bytes.
pub fn tiled_plane_size(width: usize, height: usize) -> usize {
    align(width, TILE_WIDTH) * align(height, TILE_HEIGHT)
}

fn tiled_offset(x: usize, y: usize, tile_cols: usize) -> usize {
    let tile = (y / TILE_HEIGHT) * tile_cols + x / TILE_WIDTH;
    tile * TILE_SIZE + (y % TILE_HEIGHT) * TILE_WIDTH + x % TILE_WIDTH
}

/// Copy the visible `width` x `height` region of a tiled plane into `out`.
pub fn detile_plane(src: &[u8], width: usize, height: usize, out: &mut Vec<u8>) -> Result<(), Error> {
    if src.len() < tiled_plane_size(width, height) {
        return Err(Error::BadParameter(format!(
            "tiled plane of {} bytes is too small for {}x{}",
            src.len(),
            width,
            height
        )));
    }
    let tile_cols = align(width, TILE_WIDTH) / TILE_WIDTH;
    out.reserve(width * height);
    for y in 0..height {
        let mut x = 0;
        while x < width {
            let run = (TILE_WIDTH - x % TILE_WIDTH).min(width - x);
            let start = tiled_offset(x, y, tile_cols);
            out.extend_from_slice(&src[start..start + run]);
            x += run;
        }
    }
    Ok(())
}

/// Lay out a linear `width` x `height` plane as tiles, zero padded.
pub fn tile_plane(src: &[u8], width: usize, height: usize, out: &mut [u8]) -> Result<(), Error> {
    if src.len() < width * height || out.len() < tiled_plane_size(width, height) {
        return Err(Error::BadParameter(format!(
            "plane buffers too small for {}x{}",
            width, height
        )));
    }
    let tile_cols = align(width, TILE_WIDTH) / TILE_WIDTH;
    out[..tiled_plane_size(width, height)].fill(0);
    for y in 0..height {
        let mut x = 0;
        while x < width {
            let run = (TILE_WIDTH - x % TILE_WIDTH).min(width - x);
            let start = tiled_offset(x, y, tile_cols);
            out[start..start + run].copy_from_slice(&src[y * width + x..y * width + x + run]);
            x += run;
        }
    }
    Ok(())
}

/// Pixel conversion between host formats and the engine layout.
pub trait ColorConverter: Send {
    /// Convert decoded tiled planes into `format`, replacing `out`.
    ///
    /// `width` is the luma width in bytes; the chroma plane holds
    /// interleaved UV pairs of the same byte width.
    fn from_engine(
        &mut self,
        luma: &[u8],
        chroma: &[u8],
        width: usize,
        height: usize,
        format: PixelFormat,
        out: &mut Vec<u8>,
    ) -> Result<(), Error>;

    /// Convert a host frame in `format` into the engine's tiled NV12 layout.
    ///
    /// Returns the number of bytes written to `out`.
    fn to_engine(
        &mut self,
        src: &[u8],
        format: PixelFormat,
        width: usize,
        height: usize,
        out: &mut [u8],
    ) -> Result<usize, Error>;
}

/// CPU implementation of [`ColorConverter`].
#[derive(Debug, Default)]
pub struct SoftwareConverter {
    scratch: Vec<u8>,
}

impl SoftwareConverter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColorConverter for SoftwareConverter {
    fn from_engine(
        &mut self,
        luma: &[u8],
        chroma: &[u8],
        width: usize,
        height: usize,
        format: PixelFormat,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        out.clear();
        let chroma_height = half(height);
        match format {
            PixelFormat::Nv12Tiled => {
                out.extend_from_slice(&luma[..tiled_plane_size(width, height).min(luma.len())]);
                out.extend_from_slice(
                    &chroma[..tiled_plane_size(width, chroma_height).min(chroma.len())],
                );
            }
            PixelFormat::Nv12 => {
                detile_plane(luma, width, height, out)?;
                detile_plane(chroma, width, chroma_height, out)?;
            }
            PixelFormat::Yuv420Planar => {
                detile_plane(luma, width, height, out)?;
                self.scratch.clear();
                detile_plane(chroma, width, chroma_height, &mut self.scratch)?;
                out.extend(self.scratch.iter().step_by(2));
                out.extend(self.scratch.iter().skip(1).step_by(2));
            }
        }
        Ok(())
    }

    fn to_engine(
        &mut self,
        src: &[u8],
        format: PixelFormat,
        width: usize,
        height: usize,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let luma_len = width * height;
        let chroma_height = half(height);
        let chroma_len = width * chroma_height;
        let needed = format.frame_size(width, height);
        if src.len() < needed {
            return Err(Error::BadParameter(format!(
                "{:?} frame of {} bytes is smaller than {}",
                format,
                src.len(),
                needed
            )));
        }

        let tiled_luma = tiled_plane_size(width, height);
        let total = PixelFormat::Nv12Tiled.frame_size(width, height);
        if out.len() < total {
            return Err(Error::InsufficientResources(format!(
                "engine input of {} bytes cannot hold {} bytes",
                out.len(),
                total
            )));
        }

        match format {
            PixelFormat::Nv12Tiled => out[..total].copy_from_slice(&src[..total]),
            PixelFormat::Nv12 => {
                tile_plane(&src[..luma_len], width, height, &mut out[..tiled_luma])?;
                tile_plane(
                    &src[luma_len..luma_len + chroma_len],
                    width,
                    chroma_height,
                    &mut out[tiled_luma..total],
                )?;
            }
            PixelFormat::Yuv420Planar => {
                tile_plane(&src[..luma_len], width, height, &mut out[..tiled_luma])?;
                let plane = chroma_len / 2;
                let (u, v) = src[luma_len..luma_len + 2 * plane].split_at(plane);
                self.scratch.clear();
                for (u, v) in u.iter().zip(v) {
                    self.scratch.push(*u);
                    self.scratch.push(*v);
                }
                self.scratch.resize(chroma_len, 0);
                tile_plane(&self.scratch, width, chroma_height, &mut out[tiled_luma..total])?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Nv12.frame_size(176, 144), 176 * 144 * 3 / 2);
        assert_eq!(PixelFormat::Yuv420Planar.frame_size(176, 144), 38016);
        // 176 -> 192 wide, 144 -> 160 and 72 -> 96 tall
        assert_eq!(
            PixelFormat::Nv12Tiled.frame_size(176, 144),
            192 * 160 + 192 * 96
        );
    }

    #[test]
    fn test_tile_detile_plane() {
        let (w, h) = (100, 40);
        let plane = ramp(w * h);
        let mut tiled = vec![0; tiled_plane_size(w, h)];
        tile_plane(&plane, w, h, &mut tiled).unwrap();

        // first row of the second tile column starts one tile in
        assert_eq!(tiled[TILE_SIZE], plane[64]);

        let mut back = Vec::new();
        detile_plane(&tiled, w, h, &mut back).unwrap();
        assert_eq!(back, plane);
    }

    #[test]
    fn test_yuv420_through_engine_layout() {
        let (w, h) = (64, 32);
        let src = ramp(PixelFormat::Yuv420Planar.frame_size(w, h));
        let mut conv = SoftwareConverter::new();

        let mut engine = vec![0; PixelFormat::Nv12Tiled.frame_size(w, h)];
        conv.to_engine(&src, PixelFormat::Yuv420Planar, w, h, &mut engine)
            .unwrap();

        let (luma, chroma) = engine.split_at(tiled_plane_size(w, h));
        let mut out = Vec::new();
        conv.from_engine(luma, chroma, w, h, PixelFormat::Yuv420Planar, &mut out)
            .unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_nv12_output() {
        let (w, h) = (64, 32);
        let src = ramp(PixelFormat::Nv12.frame_size(w, h));
        let mut conv = SoftwareConverter::new();
        let mut engine = vec![0; PixelFormat::Nv12Tiled.frame_size(w, h)];
        let written = conv
            .to_engine(&src, PixelFormat::Nv12, w, h, &mut engine)
            .unwrap();
        assert_eq!(written, engine.len());

        let (luma, chroma) = engine.split_at(tiled_plane_size(w, h));
        let mut out = Vec::new();
        conv.from_engine(luma, chroma, w, h, PixelFormat::Nv12, &mut out)
            .unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_short_source_rejected() {
        let mut conv = SoftwareConverter::new();
        let mut out = vec![0; PixelFormat::Nv12Tiled.frame_size(64, 32)];
        assert!(conv
            .to_engine(&[0; 10], PixelFormat::Nv12, 64, 32, &mut out)
            .is_err());
    }
}
