// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use mfcshim::codec::CodecKind;
use mfcshim::sim::DisplayOrder;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Short names accepted by `--codec`, in `mfcshim info` order.
pub const CODEC_NAMES: &[(&str, CodecKind)] = &[
    ("h264", CodecKind::H264Dec),
    ("mpeg4", CodecKind::Mpeg4Dec),
    ("h263", CodecKind::H263Dec),
    ("vp8", CodecKind::Vp8Dec),
    ("wmv", CodecKind::Vc1Dec),
    ("mp3", CodecKind::Mp3Dec),
    ("mpeg4enc", CodecKind::Mpeg4Enc),
    ("h263enc", CodecKind::H263Enc),
    ("h264enc", CodecKind::H264Enc),
];

/// Short name of `kind` as accepted by [`parse_codec`].
pub fn codec_short_name(kind: CodecKind) -> &'static str {
    CODEC_NAMES
        .iter()
        .find(|(_, k)| *k == kind)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

/// Parse a codec given by short name (`h264`, `mpeg4enc`, ...) or by
/// component name (`OMX.SEC.AVC.Decoder`).
pub fn parse_codec(s: &str) -> Result<CodecKind, CliError> {
    if let Some(kind) = CodecKind::from_name(s) {
        return Ok(kind);
    }

    let lower = s.to_lowercase();
    let lower = match lower.as_str() {
        "avc" | "h264dec" => "h264",
        "avcenc" => "h264enc",
        "mpeg4dec" => "mpeg4",
        "h263dec" => "h263",
        "vp8dec" | "vpx" => "vp8",
        "vc1" | "vc1dec" | "wmvdec" => "wmv",
        "mp3dec" => "mp3",
        other => other,
    };
    CODEC_NAMES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            let names: Vec<&str> = CODEC_NAMES.iter().map(|(name, _)| *name).collect();
            CliError::InvalidArgs(format!(
                "Unknown codec '{}' (expected one of: {})",
                s,
                names.join(", ")
            ))
        })
}

/// Parse the simulated decoder's display order (`decode` or `swap`).
pub fn parse_order(s: &str) -> Result<DisplayOrder, CliError> {
    match s.to_lowercase().as_str() {
        "decode" => Ok(DisplayOrder::Decode),
        "swap" | "swappairs" => Ok(DisplayOrder::SwapPairs),
        _ => Err(CliError::InvalidArgs(format!(
            "Invalid display order (expected decode or swap): {}",
            s
        ))),
    }
}

fn parse_dimensions(s: &str, width_str: &str, height_str: &str) -> Result<(u32, u32), CliError> {
    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }
    Ok((width, height))
}

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    if let Some((width_str, height_str)) = s.split_once('x') {
        return parse_dimensions(s, width_str, height_str);
    }
    if let Some((width_str, height_str)) = s.split_once('*') {
        return parse_dimensions(s, width_str, height_str);
    }

    Err(CliError::InvalidArgs(format!(
        "Invalid resolution format (expected WxH or W*H): {}",
        s
    )))
}

/// Parse bitrate from string (supports kbps/Mbps suffix), in kbps
pub fn parse_bitrate(s: &str) -> Result<u32, CliError> {
    let s_lower = s.to_lowercase();

    if let Some(value_str) = s_lower.strip_suffix("mbps") {
        let value = value_str
            .trim()
            .parse::<u32>()
            .map_err(|_| CliError::InvalidArgs(format!("Invalid bitrate: {}", s)))?;
        return Ok(value * 1000);
    }

    if let Some(value_str) = s_lower.strip_suffix("kbps") {
        let value = value_str
            .trim()
            .parse::<u32>()
            .map_err(|_| CliError::InvalidArgs(format!("Invalid bitrate: {}", s)))?;
        return Ok(value);
    }

    // Plain number, kbps
    s.parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid bitrate: {}", s)))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
/// Check this flag periodically in your main loop to exit gracefully.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}
