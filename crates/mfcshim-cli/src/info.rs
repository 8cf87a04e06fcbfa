// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::codec_short_name;
use clap::Args as ClapArgs;
use mfcshim::codec::CodecKind;
use mfcshim::config::ComponentConfig;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Show all information
    #[arg(long)]
    all: bool,

    /// Show the registered components and their roles
    #[arg(long)]
    components: bool,

    /// Show whether the MFC engine library loads
    #[arg(long)]
    engine: bool,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    version: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<EngineInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    components: Option<Vec<ComponentInfo>>,
}

#[derive(Debug, Serialize)]
struct EngineInfo {
    library: String,
    video: bool,
    audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComponentInfo {
    name: &'static str,
    role: &'static str,
    codec: &'static str,
    input_buffers: usize,
    input_buffer_size: usize,
    output_buffers: usize,
    output_buffer_size: usize,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    // if --all or no specific flags, show everything
    let show_all = args.all || !(args.components || args.engine);

    let info = SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        engine: (show_all || args.engine).then(query_engine_info),
        components: (show_all || args.components).then(query_components),
    };

    if json {
        let json_str = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&info);
    }

    Ok(())
}

fn query_engine_info() -> EngineInfo {
    let library = mfcshim::engine_library_path();
    log::debug!("Probing engine library {}", library);

    match mfcshim::engine_available() {
        Ok(()) => EngineInfo {
            library,
            video: true,
            audio: mfcshim::mfc::audio_available().unwrap_or(false),
            error: None,
        },
        Err(e) => {
            log::debug!("Engine not available: {}", e);
            EngineInfo {
                library,
                video: false,
                audio: false,
                error: Some(e.to_string()),
            }
        }
    }
}

fn query_components() -> Vec<ComponentInfo> {
    let config = ComponentConfig::default();
    CodecKind::all()
        .iter()
        .map(|&kind| {
            let [input, output] = kind.port_definitions(&config);
            ComponentInfo {
                name: kind.name(),
                role: kind.role(),
                codec: codec_short_name(kind),
                input_buffers: input.buffer_count_actual,
                input_buffer_size: input.buffer_size,
                output_buffers: output.buffer_count_actual,
                output_buffer_size: output.buffer_size,
            }
        })
        .collect()
}

fn print_text_info(info: &SystemInfo) {
    println!("mfcshim {}", info.version);

    if let Some(engine) = &info.engine {
        println!("\n=== MFC Engine ===");
        println!("Library:      {}", engine.library);
        println!(
            "Video codecs: {}",
            if engine.video { "available" } else { "unavailable" }
        );
        println!(
            "Audio (SRP):  {}",
            if engine.audio { "available" } else { "unavailable" }
        );
        if let Some(error) = &engine.error {
            println!("Reason:       {}", error);
        }
    }

    if let Some(components) = &info.components {
        println!("\n=== Components ===");
        for component in components {
            println!(
                "{:<22} {:<20} {:<9} in {}x{} B, out {}x{} B",
                component.name,
                component.role,
                component.codec,
                component.input_buffers,
                component.input_buffer_size,
                component.output_buffers,
                component.output_buffer_size
            );
        }
    }
}
