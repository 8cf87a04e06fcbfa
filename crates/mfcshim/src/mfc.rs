// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Engine traits implemented over the vendor library.
//!
//! Every entry point goes through [`mfcshim_sys::init`], so the library is
//! loaded on first use and a missing library surfaces as
//! [`Error::LibraryNotLoaded`] instead of a link failure. Hardware memory
//! returned by the engine (input slots, decoded planes, stream buffers)
//! stays valid until the owning handle is closed; the codec steps drop
//! their submission unit before calling `close`.

use std::ffi::{c_int, c_uint, c_ulong, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use mfcshim_sys as ffi;

use crate::codec::CodecKind;
use crate::convert::tiled_plane_size;
use crate::engine::{
    AudioDecodeEngine, AudioStreamInfo, DecodeAccept, DecodeConfig, DecodeOutput, EncodeConfig,
    EncodeOutput, EncodeParams, EngineHandle, FrameType, HardwareEngine, InputSlot, OutputStatus,
    SlotId, StreamGeometry, VideoCodec, VideoDecodeEngine, VideoEncodeEngine,
};
use crate::port::CropRect;
use crate::Error;

/// Symbols every component needs, checked by [`crate::engine_available`].
const REQUIRED_SYMBOLS: &[&str] = &[
    "SsbSipMfcDecOpen",
    "SsbSipMfcDecInit",
    "SsbSipMfcDecExe",
    "SsbSipMfcDecGetInBuf",
    "SsbSipMfcDecSetInBuf",
    "SsbSipMfcDecGetOutBuf",
    "SsbSipMfcDecSetConfig",
    "SsbSipMfcDecGetConfig",
    "SsbSipMfcDecClose",
    "SsbSipMfcEncOpen",
    "SsbSipMfcEncInit",
    "SsbSipMfcEncExe",
    "SsbSipMfcEncGetInBuf",
    "SsbSipMfcEncSetInBuf",
    "SsbSipMfcEncGetOutBuf",
    "SsbSipMfcEncSetConfig",
    "SsbSipMfcEncGetConfig",
    "SsbSipMfcEncClose",
];

/// Audio symbols, optional on parts without the audio processor.
const AUDIO_SYMBOLS: &[&str] = &[
    "SRP_Create",
    "SRP_Init",
    "SRP_Decode",
    "SRP_Send_EOS",
    "SRP_Flush",
    "SRP_GetParams",
    "SRP_Get_PCM",
    "SRP_Deinit",
    "SRP_Terminate",
];

fn symbol_missing(lib: &ffi::MfcEngineLibrary, name: &str) -> bool {
    match name {
        "SsbSipMfcDecOpen" => lib.SsbSipMfcDecOpen.is_err(),
        "SsbSipMfcDecInit" => lib.SsbSipMfcDecInit.is_err(),
        "SsbSipMfcDecExe" => lib.SsbSipMfcDecExe.is_err(),
        "SsbSipMfcDecGetInBuf" => lib.SsbSipMfcDecGetInBuf.is_err(),
        "SsbSipMfcDecSetInBuf" => lib.SsbSipMfcDecSetInBuf.is_err(),
        "SsbSipMfcDecGetOutBuf" => lib.SsbSipMfcDecGetOutBuf.is_err(),
        "SsbSipMfcDecSetConfig" => lib.SsbSipMfcDecSetConfig.is_err(),
        "SsbSipMfcDecGetConfig" => lib.SsbSipMfcDecGetConfig.is_err(),
        "SsbSipMfcDecClose" => lib.SsbSipMfcDecClose.is_err(),
        "SsbSipMfcEncOpen" => lib.SsbSipMfcEncOpen.is_err(),
        "SsbSipMfcEncInit" => lib.SsbSipMfcEncInit.is_err(),
        "SsbSipMfcEncExe" => lib.SsbSipMfcEncExe.is_err(),
        "SsbSipMfcEncGetInBuf" => lib.SsbSipMfcEncGetInBuf.is_err(),
        "SsbSipMfcEncSetInBuf" => lib.SsbSipMfcEncSetInBuf.is_err(),
        "SsbSipMfcEncGetOutBuf" => lib.SsbSipMfcEncGetOutBuf.is_err(),
        "SsbSipMfcEncSetConfig" => lib.SsbSipMfcEncSetConfig.is_err(),
        "SsbSipMfcEncGetConfig" => lib.SsbSipMfcEncGetConfig.is_err(),
        "SsbSipMfcEncClose" => lib.SsbSipMfcEncClose.is_err(),
        "SRP_Create" => lib.SRP_Create.is_err(),
        "SRP_Init" => lib.SRP_Init.is_err(),
        "SRP_Decode" => lib.SRP_Decode.is_err(),
        "SRP_Send_EOS" => lib.SRP_Send_EOS.is_err(),
        "SRP_Flush" => lib.SRP_Flush.is_err(),
        "SRP_GetParams" => lib.SRP_GetParams.is_err(),
        "SRP_Get_PCM" => lib.SRP_Get_PCM.is_err(),
        "SRP_Deinit" => lib.SRP_Deinit.is_err(),
        "SRP_Terminate" => lib.SRP_Terminate.is_err(),
        _ => true,
    }
}

/// Verify the loaded library exports every video entry point.
pub fn check_symbols(lib: &ffi::MfcEngineLibrary) -> Result<(), Error> {
    match REQUIRED_SYMBOLS
        .iter()
        .copied()
        .find(|name| symbol_missing(lib, name))
    {
        Some(name) => Err(Error::SymbolNotFound(name)),
        None => Ok(()),
    }
}

/// True if the loaded library exports the audio processor entry points.
pub fn audio_available() -> Result<bool, Error> {
    let lib = ffi::init()?;
    Ok(!AUDIO_SYMBOLS.iter().any(|name| symbol_missing(lib, name)))
}

/// Open the hardware engine `kind` runs on.
pub fn open(kind: CodecKind) -> Result<EngineHandle, Error> {
    let lib = ffi::init()?;
    check_symbols(lib)?;
    if kind.is_audio() {
        if !audio_available()? {
            return Err(Error::SymbolNotFound("SRP_Create"));
        }
        return Ok(EngineHandle::audio_decoder(MfcAudioDecoder::new()));
    }
    if kind.is_encoder() {
        Ok(EngineHandle::video_encoder(MfcVideoEncoder::new()))
    } else {
        Ok(EngineHandle::video_decoder(MfcVideoDecoder::new()))
    }
}

fn symbol<T>(name: &'static str, result: Result<T, &ffi::libloading::Error>) -> Result<T, Error> {
    result.map_err(|_| Error::SymbolNotFound(name))
}

fn check(call: &str, ret: c_int) -> Result<(), Error> {
    match ret {
        ffi::SSBSIP_MFC_ERROR_CODE_MFC_RET_OK => Ok(()),
        ffi::SSBSIP_MFC_ERROR_CODE_MFC_RET_INVALID_PARAM => {
            Err(Error::BadParameter(format!("{} rejected its parameters", call)))
        }
        code => Err(Error::Hardware(format!("{} failed: {}", call, code))),
    }
}

fn frame_type(raw: c_int) -> FrameType {
    match raw {
        ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_NOT_CODED => FrameType::Unknown,
        ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_I_FRAME => FrameType::I,
        ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_P_FRAME => FrameType::P,
        ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_B_FRAME => FrameType::B,
        ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_SKIPPED => FrameType::Skipped,
        _ => FrameType::Other,
    }
}

fn output_status(raw: c_int) -> OutputStatus {
    match raw {
        ffi::SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DECODING_ONLY => OutputStatus::DecodingOnly,
        ffi::SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_DECODING => {
            OutputStatus::DisplayDecoding
        }
        ffi::SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_ONLY => OutputStatus::DisplayOnly,
        ffi::SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_END => OutputStatus::DisplayEnd,
        _ => OutputStatus::Null,
    }
}

fn decoder_codec(codec: VideoCodec) -> ffi::SSBSIP_MFC_CODEC_TYPE {
    match codec {
        VideoCodec::H264 => ffi::SSBSIP_MFC_CODEC_TYPE_H264_DEC,
        VideoCodec::Mpeg4 => ffi::SSBSIP_MFC_CODEC_TYPE_MPEG4_DEC,
        VideoCodec::H263 => ffi::SSBSIP_MFC_CODEC_TYPE_H263_DEC,
        VideoCodec::Vp8 => ffi::SSBSIP_MFC_CODEC_TYPE_VP8_DEC,
        VideoCodec::Vc1 => ffi::SSBSIP_MFC_CODEC_TYPE_VC1_DEC,
        VideoCodec::Wmv3 => ffi::SSBSIP_MFC_CODEC_TYPE_VC1RCV_DEC,
    }
}

fn encoder_codec(codec: VideoCodec) -> Result<ffi::SSBSIP_MFC_CODEC_TYPE, Error> {
    match codec {
        VideoCodec::H264 => Ok(ffi::SSBSIP_MFC_CODEC_TYPE_H264_ENC),
        VideoCodec::Mpeg4 => Ok(ffi::SSBSIP_MFC_CODEC_TYPE_MPEG4_ENC),
        VideoCodec::H263 => Ok(ffi::SSBSIP_MFC_CODEC_TYPE_H263_ENC),
        VideoCodec::Vp8 | VideoCodec::Vc1 | VideoCodec::Wmv3 => Err(Error::BadParameter(
            format!("{:?} encoding is not supported", codec),
        )),
    }
}

fn to_int<T>(value: T) -> Result<c_int, Error>
where
    T: TryInto<c_int> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| Error::BadParameter(format!("{} out of range", value)))
}

fn align16(value: u32) -> u32 {
    (value + 15) & !15
}

/// Input slot backed by memory the engine mapped for `handle`.
struct MappedSlot {
    id: SlotId,
    data: *mut u8,
    len: usize,
}

// The mapping is owned by the engine handle, not by the thread that
// requested it.
unsafe impl Send for MappedSlot {}

impl InputSlot for MappedSlot {
    fn id(&self) -> SlotId {
        self.id
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the engine mapped `len` bytes at `data` and keeps them
        // until the handle is closed, which happens after the slots drop.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotAddress {
    phy: *mut c_void,
    virt: *mut c_void,
}

/// Video decoder over `SsbSipMfcDec*`.
pub struct MfcVideoDecoder {
    handle: *mut c_void,
    slots: Vec<SlotAddress>,
    current: Option<(SlotAddress, usize)>,
    last: Option<(ffi::SSBSIP_MFC_DEC_OUTPUT_INFO, DecodeOutput)>,
}

// The handle may be used from any thread as long as calls are serialized,
// which the shared engine mutex guarantees.
unsafe impl Send for MfcVideoDecoder {}

impl MfcVideoDecoder {
    pub fn new() -> Self {
        Self {
            handle: ptr::null_mut(),
            slots: Vec::new(),
            current: None,
            last: None,
        }
    }

    fn ensure_open(&mut self) -> Result<*mut c_void, Error> {
        if self.handle.is_null() {
            let lib = ffi::init()?;
            let handle = symbol("SsbSipMfcDecOpen", unsafe { lib.SsbSipMfcDecOpen() })?;
            if handle.is_null() {
                return Err(Error::HardwareInit("SsbSipMfcDecOpen returned no handle".into()));
            }
            log::debug!("decoder handle opened");
            self.handle = handle;
        }
        Ok(self.handle)
    }

    fn opened(&self) -> Result<*mut c_void, Error> {
        if self.handle.is_null() {
            return Err(Error::IncorrectStateOperation);
        }
        Ok(self.handle)
    }

    fn get_config<T: Default>(&mut self, conf: c_uint) -> Result<T, Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let mut value = T::default();
        let ret = symbol("SsbSipMfcDecGetConfig", unsafe {
            lib.SsbSipMfcDecGetConfig(handle, conf, &mut value as *mut T as *mut c_void)
        })?;
        check("SsbSipMfcDecGetConfig", ret)?;
        Ok(value)
    }
}

impl Default for MfcVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MfcVideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

impl HardwareEngine for MfcVideoDecoder {
    fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error> {
        let handle = self.ensure_open()?;
        let lib = ffi::init()?;
        let mut phy = ptr::null_mut();
        let virt = symbol("SsbSipMfcDecGetInBuf", unsafe {
            lib.SsbSipMfcDecGetInBuf(handle, &mut phy, to_int(size)?)
        })?;
        if virt.is_null() {
            return Err(Error::InsufficientResources(format!(
                "no decoder input buffer of {} bytes",
                size
            )));
        }
        self.slots.push(SlotAddress { phy, virt });
        Ok(Box::new(MappedSlot {
            id: self.slots.len() - 1,
            data: virt as *mut u8,
            len: size,
        }))
    }

    fn set_in_buffer(&mut self, slot: SlotId, len: usize) -> Result<(), Error> {
        let handle = self.opened()?;
        let address = *self
            .slots
            .get(slot)
            .ok_or_else(|| Error::BadParameter(format!("unknown input slot {}", slot)))?;
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcDecSetInBuf", unsafe {
            lib.SsbSipMfcDecSetInBuf(handle, address.phy, address.virt, to_int(len)?)
        })?;
        check("SsbSipMfcDecSetInBuf", ret)?;
        self.current = Some((address, len));
        Ok(())
    }

    fn execute(&mut self, len: usize) -> Result<(), Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcDecExe", unsafe {
            lib.SsbSipMfcDecExe(handle, to_int(len)?)
        })?;
        check("SsbSipMfcDecExe", ret)
    }
}

impl VideoDecodeEngine for MfcVideoDecoder {
    fn init(&mut self, codec: VideoCodec, header_len: usize) -> Result<(), Error> {
        let handle = self.ensure_open()?;
        if self.current.is_none() {
            return Err(Error::BadParameter("no stream header staged".into()));
        }
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcDecInit", unsafe {
            lib.SsbSipMfcDecInit(handle, decoder_codec(codec), to_int(header_len)?)
        })?;
        check("SsbSipMfcDecInit", ret)?;
        log::debug!("decoder init {:?} with {} header bytes", codec, header_len);
        Ok(())
    }

    fn geometry(&mut self) -> Result<StreamGeometry, Error> {
        let size: ffi::SSBSIP_MFC_IMG_RESOLUTION =
            self.get_config(ffi::MFC_DEC_GETCONF_BUF_WIDTH_HEIGHT)?;
        let crop: ffi::SSBSIP_MFC_CROP_INFORMATION =
            self.get_config(ffi::MFC_DEC_GETCONF_CROP_INFO)?;

        let width = size.width.max(0) as u32;
        let height = size.height.max(0) as u32;
        let left = crop.crop_left_offset.max(0) as u32;
        let top = crop.crop_top_offset.max(0) as u32;
        let right = crop.crop_right_offset.max(0) as u32;
        let bottom = crop.crop_bottom_offset.max(0) as u32;
        Ok(StreamGeometry {
            width,
            height,
            buffer_width: align16(width),
            buffer_height: align16(height),
            crop: CropRect {
                left,
                top,
                width: width.saturating_sub(left + right),
                height: height.saturating_sub(top + bottom),
            },
        })
    }

    fn get_out_buffer(&mut self) -> Result<DecodeOutput, Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let mut info = ffi::SSBSIP_MFC_DEC_OUTPUT_INFO {
            img_width: 0,
            img_height: 0,
            buf_width: 0,
            buf_height: 0,
            YPhyAddr: ptr::null_mut(),
            CPhyAddr: ptr::null_mut(),
            YVirAddr: ptr::null_mut(),
            CVirAddr: ptr::null_mut(),
            disp_pic_frame_type: 0,
        };
        let status = symbol("SsbSipMfcDecGetOutBuf", unsafe {
            lib.SsbSipMfcDecGetOutBuf(handle, &mut info)
        })?;
        let mut output = DecodeOutput {
            status: output_status(status),
            frame_type: frame_type(info.disp_pic_frame_type),
            width: info.img_width.max(0) as u32,
            height: info.img_height.max(0) as u32,
        };
        if output.status.has_display() && (info.YVirAddr.is_null() || info.CVirAddr.is_null()) {
            log::warn!("decoder reported a display frame without planes");
            output.status = OutputStatus::DecodingOnly;
        }
        self.last = Some((info, output));
        Ok(output)
    }

    fn planes(&self) -> (&[u8], &[u8]) {
        let Some((info, output)) = self.last.as_ref() else {
            return (&[], &[]);
        };
        if !output.status.has_display() {
            return (&[], &[]);
        }
        let width = output.width as usize;
        let height = output.height as usize;
        let luma_len = tiled_plane_size(width, height);
        let chroma_len = tiled_plane_size(width, (height + 1) / 2);
        // SAFETY: the engine keeps the displayed planes mapped until the
        // next execution, which needs `&mut self`.
        unsafe {
            (
                std::slice::from_raw_parts(info.YVirAddr as *const u8, luma_len),
                std::slice::from_raw_parts(info.CVirAddr as *const u8, chroma_len),
            )
        }
    }

    fn set_config(&mut self, config: DecodeConfig) -> Result<(), Error> {
        let handle = self.ensure_open()?;
        let (conf, mut value) = match config {
            DecodeConfig::FrameTag(tag) => (ffi::MFC_DEC_SETCONF_FRAME_TAG, tag),
            DecodeConfig::DisplayDelay(delay) => (ffi::MFC_DEC_SETCONF_DISPLAY_DELAY, to_int(delay)?),
            DecodeConfig::ExtraBufferNum(count) => {
                (ffi::MFC_DEC_SETCONF_EXTRA_BUFFER_NUM, to_int(count)?)
            }
        };
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcDecSetConfig", unsafe {
            lib.SsbSipMfcDecSetConfig(handle, conf, &mut value as *mut c_int as *mut c_void)
        })?;
        check("SsbSipMfcDecSetConfig", ret)
    }

    fn frame_tag(&mut self) -> Result<i32, Error> {
        self.get_config::<c_int>(ffi::MFC_DEC_GETCONF_FRAME_TAG)
    }

    fn close(&mut self) {
        if self.handle.is_null() {
            return;
        }
        if let Ok(lib) = ffi::init() {
            match unsafe { lib.SsbSipMfcDecClose(self.handle) } {
                Ok(ret) => {
                    if let Err(err) = check("SsbSipMfcDecClose", ret) {
                        log::warn!("{}", err);
                    }
                }
                Err(err) => log::warn!("SsbSipMfcDecClose unavailable: {}", err),
            }
        }
        log::debug!("decoder handle closed");
        self.handle = ptr::null_mut();
        self.slots.clear();
        self.current = None;
        self.last = None;
    }
}

/// Staging memory for one encoder input frame.
///
/// The engine maps luma and chroma separately, so frames are staged
/// contiguously here and split into the planes on `set_in_buffer`.
struct StagingSlot {
    id: SlotId,
    data: *mut u8,
    len: usize,
}

unsafe impl Send for StagingSlot {}

impl InputSlot for StagingSlot {
    fn id(&self) -> SlotId {
        self.id
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: points into a boxed allocation owned by the encoder,
        // released only by `close` after the slots drop.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }
}

struct EncoderSlot {
    staging: Box<[u8]>,
    input: ffi::SSBSIP_MFC_ENC_INPUT_INFO,
}

/// Video encoder over `SsbSipMfcEnc*`.
pub struct MfcVideoEncoder {
    handle: *mut c_void,
    params: Option<EncodeParams>,
    slots: Vec<EncoderSlot>,
    current: Option<SlotId>,
    stream: Vec<u8>,
}

unsafe impl Send for MfcVideoEncoder {}

impl MfcVideoEncoder {
    pub fn new() -> Self {
        Self {
            handle: ptr::null_mut(),
            params: None,
            slots: Vec::new(),
            current: None,
            stream: Vec::new(),
        }
    }

    fn opened(&self) -> Result<*mut c_void, Error> {
        if self.handle.is_null() {
            return Err(Error::IncorrectStateOperation);
        }
        Ok(self.handle)
    }

    fn out_info(&mut self) -> Result<ffi::SSBSIP_MFC_ENC_OUTPUT_INFO, Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let mut info = ffi::SSBSIP_MFC_ENC_OUTPUT_INFO {
            headerSize: 0,
            dataSize: 0,
            frameType: 0,
            StrmPhyAddr: ptr::null_mut(),
            StrmVirAddr: ptr::null_mut(),
        };
        let ret = symbol("SsbSipMfcEncGetOutBuf", unsafe {
            lib.SsbSipMfcEncGetOutBuf(handle, &mut info)
        })?;
        check("SsbSipMfcEncGetOutBuf", ret)?;
        Ok(info)
    }

    fn set_int(&mut self, conf: c_uint, mut value: c_int) -> Result<(), Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcEncSetConfig", unsafe {
            lib.SsbSipMfcEncSetConfig(handle, conf, &mut value as *mut c_int as *mut c_void)
        })?;
        check("SsbSipMfcEncSetConfig", ret)
    }
}

impl Default for MfcVideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MfcVideoEncoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy `len` bytes at `addr` out of engine memory.
///
/// # Safety
///
/// `addr` must point to at least `len` readable bytes.
unsafe fn copy_stream(addr: *const c_void, len: usize, out: &mut Vec<u8>) {
    out.clear();
    if !addr.is_null() && len > 0 {
        out.extend_from_slice(unsafe { std::slice::from_raw_parts(addr as *const u8, len) });
    }
}

impl HardwareEngine for MfcVideoEncoder {
    fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let mut input = ffi::SSBSIP_MFC_ENC_INPUT_INFO {
            YPhyAddr: ptr::null_mut(),
            CPhyAddr: ptr::null_mut(),
            YVirAddr: ptr::null_mut(),
            CVirAddr: ptr::null_mut(),
            YSize: 0,
            CSize: 0,
        };
        let ret = symbol("SsbSipMfcEncGetInBuf", unsafe {
            lib.SsbSipMfcEncGetInBuf(handle, &mut input)
        })?;
        check("SsbSipMfcEncGetInBuf", ret)?;
        if input.YVirAddr.is_null() || input.CVirAddr.is_null() {
            return Err(Error::InsufficientResources("no encoder input frame".into()));
        }

        let mut staging = vec![0u8; size].into_boxed_slice();
        let data = staging.as_mut_ptr();
        self.slots.push(EncoderSlot { staging, input });
        Ok(Box::new(StagingSlot {
            id: self.slots.len() - 1,
            data,
            len: size,
        }))
    }

    fn set_in_buffer(&mut self, slot: SlotId, len: usize) -> Result<(), Error> {
        let handle = self.opened()?;
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::BadParameter(format!("unknown input slot {}", slot)))?;

        let luma = (entry.input.YSize.max(0) as usize).min(len);
        let chroma = (entry.input.CSize.max(0) as usize).min(len - luma);
        // SAFETY: the engine mapped YSize and CSize bytes for this frame.
        unsafe {
            ptr::copy_nonoverlapping(entry.staging.as_ptr(), entry.input.YVirAddr as *mut u8, luma);
            ptr::copy_nonoverlapping(
                entry.staging[luma..].as_ptr(),
                entry.input.CVirAddr as *mut u8,
                chroma,
            );
        }

        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcEncSetInBuf", unsafe {
            lib.SsbSipMfcEncSetInBuf(handle, &mut entry.input)
        })?;
        check("SsbSipMfcEncSetInBuf", ret)?;
        self.current = Some(slot);
        Ok(())
    }

    fn execute(&mut self, _len: usize) -> Result<(), Error> {
        let handle = self.opened()?;
        if self.current.is_none() {
            return Err(Error::IncorrectStateOperation);
        }
        let lib = ffi::init()?;
        let ret = symbol("SsbSipMfcEncExe", unsafe { lib.SsbSipMfcEncExe(handle) })?;
        check("SsbSipMfcEncExe", ret)
    }
}

impl VideoEncodeEngine for MfcVideoEncoder {
    fn init(&mut self, params: &EncodeParams) -> Result<(), Error> {
        if params.width == 0 || params.height == 0 || params.bitrate == 0 {
            return Err(Error::BadParameter(format!(
                "invalid encoder parameters {}x{} @ {} bps",
                params.width, params.height, params.bitrate
            )));
        }
        let codec = encoder_codec(params.codec)?;
        let lib = ffi::init()?;
        if self.handle.is_null() {
            let handle = symbol("SsbSipMfcEncOpen", unsafe { lib.SsbSipMfcEncOpen() })?;
            if handle.is_null() {
                return Err(Error::HardwareInit("SsbSipMfcEncOpen returned no handle".into()));
            }
            self.handle = handle;
        }

        let mut raw = ffi::SSBSIP_MFC_ENC_PARAMS {
            codecType: codec,
            SourceWidth: to_int(params.width)?,
            SourceHeight: to_int(params.height)?,
            Bitrate: to_int(params.bitrate)?,
            FrameRate: to_int(params.frame_rate)?,
            IDRPeriod: to_int(params.gop_size)?,
        };
        let ret = symbol("SsbSipMfcEncInit", unsafe {
            lib.SsbSipMfcEncInit(self.handle, &mut raw)
        })?;
        check("SsbSipMfcEncInit", ret)?;
        self.params = Some(*params);
        log::debug!(
            "encoder init {:?} {}x{} @ {} bps",
            params.codec,
            params.width,
            params.height,
            params.bitrate
        );
        Ok(())
    }

    fn stream_header(&mut self) -> Result<Vec<u8>, Error> {
        if self.params.is_none() {
            return Err(Error::IncorrectStateOperation);
        }
        let info = self.out_info()?;
        let mut header = Vec::new();
        // SAFETY: after init the stream buffer holds headerSize bytes.
        unsafe {
            copy_stream(info.StrmVirAddr, info.headerSize.max(0) as usize, &mut header);
        }
        Ok(header)
    }

    fn get_out_buffer(&mut self) -> Result<EncodeOutput, Error> {
        let info = self.out_info()?;
        let len = info.dataSize.max(0) as usize;
        // SAFETY: the stream buffer holds dataSize bytes until the next
        // execution.
        unsafe {
            copy_stream(info.StrmVirAddr, len, &mut self.stream);
        }
        Ok(EncodeOutput {
            frame_type: frame_type(info.frameType),
            len: self.stream.len(),
        })
    }

    fn stream(&self) -> &[u8] {
        &self.stream
    }

    fn set_config(&mut self, config: EncodeConfig) -> Result<(), Error> {
        match config {
            EncodeConfig::FrameTag(tag) => self.set_int(ffi::MFC_ENC_SETCONF_FRAME_TAG, tag),
            EncodeConfig::Bitrate(bitrate) => {
                self.set_int(ffi::MFC_ENC_SETCONF_CHANGE_BIT_RATE, to_int(bitrate)?)
            }
            EncodeConfig::FrameRate(rate) => {
                self.set_int(ffi::MFC_ENC_SETCONF_CHANGE_FRAME_RATE, to_int(rate)?)
            }
            EncodeConfig::ForceKeyFrame => self.set_int(
                ffi::MFC_ENC_SETCONF_FRAME_TYPE,
                ffi::SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_I_FRAME,
            ),
        }
    }

    fn frame_tag(&mut self) -> Result<i32, Error> {
        let handle = self.opened()?;
        let lib = ffi::init()?;
        let mut tag: c_int = -1;
        let ret = symbol("SsbSipMfcEncGetConfig", unsafe {
            lib.SsbSipMfcEncGetConfig(
                handle,
                ffi::MFC_ENC_GETCONF_FRAME_TAG,
                &mut tag as *mut c_int as *mut c_void,
            )
        })?;
        check("SsbSipMfcEncGetConfig", ret)?;
        Ok(tag)
    }

    fn close(&mut self) {
        if self.handle.is_null() {
            return;
        }
        if let Ok(lib) = ffi::init() {
            match unsafe { lib.SsbSipMfcEncClose(self.handle) } {
                Ok(ret) => {
                    if let Err(err) = check("SsbSipMfcEncClose", ret) {
                        log::warn!("{}", err);
                    }
                }
                Err(err) => log::warn!("SsbSipMfcEncClose unavailable: {}", err),
            }
        }
        log::debug!("encoder handle closed");
        self.handle = ptr::null_mut();
        self.params = None;
        self.slots.clear();
        self.current = None;
        self.stream.clear();
    }
}

/// The audio processor has one global context per process.
static SRP_IN_USE: AtomicBool = AtomicBool::new(false);

/// Input buffer size handed to `SRP_Init`.
const SRP_INPUT_BUFFER_SIZE: c_uint = 16 * 1024;

/// MP3 decoder over the `SRP_*` audio processor, in blocking mode.
pub struct MfcAudioDecoder {
    active: bool,
}

impl MfcAudioDecoder {
    pub fn new() -> Self {
        Self { active: false }
    }

    fn param(&self, id: c_int) -> Result<c_ulong, Error> {
        let lib = ffi::init()?;
        let mut value: c_ulong = 0;
        let ret = symbol("SRP_GetParams", unsafe { lib.SRP_GetParams(id, &mut value) })?;
        if ret < 0 {
            return Err(Error::Hardware(format!("SRP_GetParams({:#x}) failed: {}", id, ret)));
        }
        Ok(value)
    }
}

impl Default for MfcAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MfcAudioDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn srp_check(call: &str, ret: c_int) -> Result<(), Error> {
    if ret < 0 {
        return Err(Error::Hardware(format!("{} failed: {}", call, ret)));
    }
    Ok(())
}

impl AudioDecodeEngine for MfcAudioDecoder {
    fn init(&mut self) -> Result<(), Error> {
        if !self.active {
            if SRP_IN_USE.swap(true, Ordering::SeqCst) {
                return Err(Error::InsufficientResources(
                    "audio processor already in use".into(),
                ));
            }
            self.active = true;
        }
        let result: Result<(), Error> = (|| {
            let lib = ffi::init()?;
            let ret = symbol("SRP_Create", unsafe { lib.SRP_Create(ffi::SRP_INIT_BLOCK_MODE) })?;
            srp_check("SRP_Create", ret)?;
            let ret = symbol("SRP_Init", unsafe { lib.SRP_Init(SRP_INPUT_BUFFER_SIZE) })?;
            srp_check("SRP_Init", ret)
        })();
        if result.is_err() {
            self.active = false;
            SRP_IN_USE.store(false, Ordering::SeqCst);
        }
        result
    }

    fn decode(&mut self, data: &[u8]) -> Result<DecodeAccept, Error> {
        if !self.active {
            return Err(Error::IncorrectStateOperation);
        }
        let lib = ffi::init()?;
        // SRP_Decode only reads the buffer.
        let ret = symbol("SRP_Decode", unsafe {
            lib.SRP_Decode(data.as_ptr() as *mut c_void, to_int(data.len())?)
        })?;
        match ret {
            ffi::SRP_DECODE_INPUT_BUFFER_FULL => Ok(DecodeAccept::InputOverflow),
            ret => srp_check("SRP_Decode", ret).map(|()| DecodeAccept::Accepted),
        }
    }

    fn send_eos(&mut self) -> Result<(), Error> {
        let lib = ffi::init()?;
        let ret = symbol("SRP_Send_EOS", unsafe { lib.SRP_Send_EOS() })?;
        srp_check("SRP_Send_EOS", ret)
    }

    fn stream_info(&mut self) -> Result<AudioStreamInfo, Error> {
        let channels = self.param(ffi::SRP_DEC_CHANNELS)?;
        let sample_rate = self.param(ffi::SRP_DEC_SAMPLE_RATE)?;
        Ok(AudioStreamInfo {
            channels: u32::try_from(channels).unwrap_or(0),
            sample_rate: u32::try_from(sample_rate).unwrap_or(0),
        })
    }

    fn read_pcm(&mut self, out: &mut Vec<u8>) -> Result<usize, Error> {
        let lib = ffi::init()?;
        let mut addr = ptr::null_mut();
        let mut size: c_uint = 0;
        let ret = symbol("SRP_Get_PCM", unsafe { lib.SRP_Get_PCM(&mut addr, &mut size) })?;
        srp_check("SRP_Get_PCM", ret)?;
        if addr.is_null() || size == 0 {
            return Ok(0);
        }
        let len = size as usize;
        // SAFETY: the processor returned `size` bytes of PCM at `addr`,
        // valid until the next SRP call.
        out.extend_from_slice(unsafe { std::slice::from_raw_parts(addr as *const u8, len) });
        Ok(len)
    }

    fn is_stopped(&mut self) -> Result<bool, Error> {
        Ok(self.param(ffi::SRP_STOP_EOS_STATE)? == 1)
    }

    fn flush(&mut self) -> Result<(), Error> {
        let lib = ffi::init()?;
        let ret = symbol("SRP_Flush", unsafe { lib.SRP_Flush() })?;
        srp_check("SRP_Flush", ret)
    }

    fn close(&mut self) {
        if !self.active {
            return;
        }
        if let Ok(lib) = ffi::init() {
            for (name, ret) in [
                ("SRP_Deinit", unsafe { lib.SRP_Deinit() }),
                ("SRP_Terminate", unsafe { lib.SRP_Terminate() }),
            ] {
                match ret {
                    Ok(ret) if ret < 0 => log::warn!("{} failed: {}", name, ret),
                    Ok(_) => {}
                    Err(err) => log::warn!("{} unavailable: {}", name, err),
                }
            }
        }
        self.active = false;
        SRP_IN_USE.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_status_mapping() {
        assert_eq!(output_status(0), OutputStatus::Null);
        assert_eq!(output_status(1), OutputStatus::DecodingOnly);
        assert_eq!(output_status(2), OutputStatus::DisplayDecoding);
        assert_eq!(output_status(3), OutputStatus::DisplayOnly);
        assert_eq!(output_status(4), OutputStatus::DisplayEnd);
        assert_eq!(output_status(-7), OutputStatus::Null);
    }

    #[test]
    fn test_frame_type_mapping() {
        assert_eq!(frame_type(1), FrameType::I);
        assert_eq!(frame_type(2), FrameType::P);
        assert_eq!(frame_type(3), FrameType::B);
        assert_eq!(frame_type(4), FrameType::Skipped);
        assert_eq!(frame_type(0), FrameType::Unknown);
        assert_eq!(frame_type(42), FrameType::Other);
    }

    #[test]
    fn test_codec_types() {
        assert_eq!(decoder_codec(VideoCodec::Vp8), 10);
        assert_eq!(decoder_codec(VideoCodec::Vc1), 1);
        assert_eq!(decoder_codec(VideoCodec::Wmv3), 7);
        assert_eq!(encoder_codec(VideoCodec::H263).unwrap(), 21);
        assert!(matches!(
            encoder_codec(VideoCodec::Vp8),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn test_return_codes() {
        assert!(check("call", ffi::SSBSIP_MFC_ERROR_CODE_MFC_RET_OK).is_ok());
        assert!(matches!(
            check("call", ffi::SSBSIP_MFC_ERROR_CODE_MFC_RET_INVALID_PARAM),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            check("call", ffi::SSBSIP_MFC_ERROR_CODE_MFC_RET_FAIL),
            Err(Error::Hardware(_))
        ));
    }

    #[test]
    fn test_unopened_decoder_rejects_calls() {
        let mut dec = MfcVideoDecoder::new();
        assert!(matches!(
            dec.execute(16),
            Err(Error::IncorrectStateOperation)
        ));
        assert_eq!(dec.planes().0.len(), 0);
        dec.close();
    }

    #[test]
    fn test_encoder_rejects_bad_params() {
        let mut enc = MfcVideoEncoder::new();
        let params = EncodeParams {
            codec: VideoCodec::Mpeg4,
            width: 0,
            height: 144,
            bitrate: 64_000,
            frame_rate: 30,
            gop_size: 15,
        };
        assert!(matches!(enc.init(&params), Err(Error::BadParameter(_))));
        assert!(matches!(
            enc.stream_header(),
            Err(Error::IncorrectStateOperation)
        ));
    }

    #[test]
    #[serial]
    #[ignore = "test requires MFC hardware (run with --ignored on target)"]
    fn test_open_decoder_engine() {
        let engine = open(CodecKind::H264Dec).unwrap();
        assert!(matches!(engine, EngineHandle::VideoDecoder(_)));
    }

    #[test]
    #[serial]
    #[ignore = "test requires MFC hardware (run with --ignored on target)"]
    fn test_audio_processor_single_owner() {
        if !audio_available().unwrap() {
            return;
        }
        let mut first = MfcAudioDecoder::new();
        first.init().unwrap();
        let mut second = MfcAudioDecoder::new();
        assert!(matches!(
            second.init(),
            Err(Error::InsufficientResources(_))
        ));
        first.close();
        second.init().unwrap();
    }
}
