// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::{self, codec_short_name};
use clap::Args as ClapArgs;
use mfcshim::codec::frame::{split_stream, FrameSplit};
use mfcshim::codec::CodecKind;
use serde::Serialize;
use std::path::PathBuf;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Raw elementary stream to scan
    pub input: PathBuf,

    /// Stream codec (h264, mpeg4, h263)
    #[arg(short, long, value_parser = utils::parse_codec)]
    pub codec: CodecKind,

    /// Print the offset and size of every frame
    #[arg(long)]
    pub frames: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ScanReport {
    pub codec: &'static str,
    pub bytes: usize,
    pub frame_count: usize,
    pub min_frame: usize,
    pub max_frame: usize,
    pub avg_frame: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<FrameEntry>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FrameEntry {
    pub offset: usize,
    pub size: usize,
}

/// Split `data` into frames the way the `kind` decoder does.
pub fn scan(kind: CodecKind, data: &[u8], list: bool) -> Result<ScanReport, CliError> {
    let split = kind.split();
    if kind.is_encoder() || split == FrameSplit::WholeBuffer {
        return Err(CliError::InvalidArgs(format!(
            "{} streams carry no in-band frame boundaries",
            codec_short_name(kind)
        )));
    }

    let sizes = split_stream(split, data);
    let frame_count = sizes.len();
    let frames = list.then(|| {
        let mut offset = 0;
        sizes
            .iter()
            .map(|&size| {
                let entry = FrameEntry { offset, size };
                offset += size;
                entry
            })
            .collect()
    });

    Ok(ScanReport {
        codec: codec_short_name(kind),
        bytes: data.len(),
        frame_count,
        min_frame: sizes.iter().copied().min().unwrap_or(0),
        max_frame: sizes.iter().copied().max().unwrap_or(0),
        avg_frame: if frame_count > 0 {
            data.len() / frame_count
        } else {
            0
        },
        frames,
    })
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Scanning {} as {}", args.input.display(), args.codec);
    let data = std::fs::read(&args.input).map_err(|e| {
        CliError::InvalidArgs(format!("Cannot read {}: {}", args.input.display(), e))
    })?;

    let report = scan(args.codec, &data, args.frames)?;
    if json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("File:        {}", args.input.display());
    println!("Codec:       {}", report.codec);
    println!("Bytes:       {}", report.bytes);
    println!("Frames:      {}", report.frame_count);
    println!(
        "Frame size:  min {} / avg {} / max {} bytes",
        report.min_frame, report.avg_frame, report.max_frame
    );
    if let Some(frames) = &report.frames {
        println!();
        for (index, frame) in frames.iter().enumerate() {
            println!("{:>6}  offset {:>10}  size {:>8}", index, frame.offset, frame.size);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpeg4_stream() -> Vec<u8> {
        let mut data = vec![0, 0, 1, 0xB0, 0x01, 0, 0, 1, 0xB6, 0x10, 0x11];
        data.extend_from_slice(&[0, 0, 1, 0xB6, 0x50, 0x22, 0x33]);
        data.extend_from_slice(&[0, 0, 1, 0xB6, 0x50, 0x44]);
        data
    }

    #[test]
    fn test_scan_mpeg4() {
        let data = mpeg4_stream();
        let report = scan(CodecKind::Mpeg4Dec, &data, true).unwrap();
        assert_eq!(report.frame_count, 3);
        assert_eq!(report.bytes, data.len());
        assert_eq!(report.min_frame, 6);
        assert_eq!(report.max_frame, 11);

        let frames = report.frames.unwrap();
        assert_eq!(frames[1], FrameEntry { offset: 11, size: 7 });
    }

    #[test]
    fn test_scan_rejects_unframed_codecs() {
        assert!(matches!(
            scan(CodecKind::Vp8Dec, &[1, 2, 3], false),
            Err(CliError::InvalidArgs(_))
        ));
        assert!(matches!(
            scan(CodecKind::H264Enc, &[1, 2, 3], false),
            Err(CliError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_scan_empty() {
        let report = scan(CodecKind::H263Dec, &[], false).unwrap();
        assert_eq!(report.frame_count, 0);
        assert_eq!(report.avg_frame, 0);
    }
}
