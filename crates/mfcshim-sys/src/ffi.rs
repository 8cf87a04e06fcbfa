// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

// Runtime bindings for include/mfc_engine.h.

use std::ffi::{c_int, c_uint, c_ulong, c_void};

pub type SSBSIP_MFC_ERROR_CODE = c_int;
pub const SSBSIP_MFC_ERROR_CODE_MFC_RET_OK: SSBSIP_MFC_ERROR_CODE = 1;
pub const SSBSIP_MFC_ERROR_CODE_MFC_RET_FAIL: SSBSIP_MFC_ERROR_CODE = -1000;
pub const SSBSIP_MFC_ERROR_CODE_MFC_RET_DEC_INIT_FAIL: SSBSIP_MFC_ERROR_CODE = -2000;
pub const SSBSIP_MFC_ERROR_CODE_MFC_RET_ENC_INIT_FAIL: SSBSIP_MFC_ERROR_CODE = -3000;
pub const SSBSIP_MFC_ERROR_CODE_MFC_RET_INVALID_PARAM: SSBSIP_MFC_ERROR_CODE = -4001;

pub type SSBSIP_MFC_CODEC_TYPE = c_int;
pub const SSBSIP_MFC_CODEC_TYPE_H264_DEC: SSBSIP_MFC_CODEC_TYPE = 0;
pub const SSBSIP_MFC_CODEC_TYPE_VC1_DEC: SSBSIP_MFC_CODEC_TYPE = 1;
pub const SSBSIP_MFC_CODEC_TYPE_MPEG4_DEC: SSBSIP_MFC_CODEC_TYPE = 3;
pub const SSBSIP_MFC_CODEC_TYPE_H263_DEC: SSBSIP_MFC_CODEC_TYPE = 4;
pub const SSBSIP_MFC_CODEC_TYPE_VC1RCV_DEC: SSBSIP_MFC_CODEC_TYPE = 7;
pub const SSBSIP_MFC_CODEC_TYPE_VP8_DEC: SSBSIP_MFC_CODEC_TYPE = 10;
pub const SSBSIP_MFC_CODEC_TYPE_MPEG4_ENC: SSBSIP_MFC_CODEC_TYPE = 20;
pub const SSBSIP_MFC_CODEC_TYPE_H263_ENC: SSBSIP_MFC_CODEC_TYPE = 21;
pub const SSBSIP_MFC_CODEC_TYPE_H264_ENC: SSBSIP_MFC_CODEC_TYPE = 22;

pub type SSBSIP_MFC_DEC_OUTBUF_STATUS = c_int;
pub const SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_STATUS_NULL: SSBSIP_MFC_DEC_OUTBUF_STATUS = 0;
pub const SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DECODING_ONLY: SSBSIP_MFC_DEC_OUTBUF_STATUS = 1;
pub const SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_DECODING: SSBSIP_MFC_DEC_OUTBUF_STATUS =
    2;
pub const SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_ONLY: SSBSIP_MFC_DEC_OUTBUF_STATUS = 3;
pub const SSBSIP_MFC_DEC_OUTBUF_STATUS_MFC_GETOUTBUF_DISPLAY_END: SSBSIP_MFC_DEC_OUTBUF_STATUS = 4;

pub type SSBSIP_MFC_FRAME_TYPE = c_int;
pub const SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_NOT_CODED: SSBSIP_MFC_FRAME_TYPE = 0;
pub const SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_I_FRAME: SSBSIP_MFC_FRAME_TYPE = 1;
pub const SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_P_FRAME: SSBSIP_MFC_FRAME_TYPE = 2;
pub const SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_B_FRAME: SSBSIP_MFC_FRAME_TYPE = 3;
pub const SSBSIP_MFC_FRAME_TYPE_MFC_FRAME_TYPE_SKIPPED: SSBSIP_MFC_FRAME_TYPE = 4;

pub const MFC_DEC_SETCONF_POST_ENABLE: c_uint = 0x00C0_0001;
pub const MFC_DEC_SETCONF_EXTRA_BUFFER_NUM: c_uint = 0x00C0_0002;
pub const MFC_DEC_SETCONF_DISPLAY_DELAY: c_uint = 0x00C0_0003;
pub const MFC_DEC_SETCONF_FRAME_TAG: c_uint = 0x00C0_0010;
pub const MFC_DEC_GETCONF_FRAME_TAG: c_uint = 0x00C0_0011;
pub const MFC_DEC_GETCONF_BUF_WIDTH_HEIGHT: c_uint = 0x00C0_0020;
pub const MFC_DEC_GETCONF_CROP_INFO: c_uint = 0x00C0_0021;

pub const MFC_ENC_SETCONF_FRAME_TYPE: c_uint = 0x00D0_0001;
pub const MFC_ENC_SETCONF_CHANGE_FRAME_RATE: c_uint = 0x00D0_0002;
pub const MFC_ENC_SETCONF_CHANGE_BIT_RATE: c_uint = 0x00D0_0003;
pub const MFC_ENC_SETCONF_I_PERIOD: c_uint = 0x00D0_0004;
pub const MFC_ENC_SETCONF_FRAME_TAG: c_uint = 0x00D0_0010;
pub const MFC_ENC_GETCONF_FRAME_TAG: c_uint = 0x00D0_0011;

pub const SRP_INIT_BLOCK_MODE: c_int = 0;
pub const SRP_DECODE_INPUT_BUFFER_FULL: c_int = -2;
pub const SRP_STOP_EOS_STATE: c_int = 0x0000_0100;
pub const SRP_DEC_CHANNELS: c_int = 0x0000_0200;
pub const SRP_DEC_SAMPLE_RATE: c_int = 0x0000_0201;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SSBSIP_MFC_DEC_OUTPUT_INFO {
    pub img_width: c_int,
    pub img_height: c_int,
    pub buf_width: c_int,
    pub buf_height: c_int,
    pub YPhyAddr: *mut c_void,
    pub CPhyAddr: *mut c_void,
    pub YVirAddr: *mut c_void,
    pub CVirAddr: *mut c_void,
    pub disp_pic_frame_type: c_int,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct SSBSIP_MFC_IMG_RESOLUTION {
    pub width: c_int,
    pub height: c_int,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct SSBSIP_MFC_CROP_INFORMATION {
    pub crop_top_offset: c_int,
    pub crop_bottom_offset: c_int,
    pub crop_left_offset: c_int,
    pub crop_right_offset: c_int,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct SSBSIP_MFC_ENC_PARAMS {
    pub codecType: SSBSIP_MFC_CODEC_TYPE,
    pub SourceWidth: c_int,
    pub SourceHeight: c_int,
    pub Bitrate: c_int,
    pub FrameRate: c_int,
    pub IDRPeriod: c_int,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SSBSIP_MFC_ENC_INPUT_INFO {
    pub YPhyAddr: *mut c_void,
    pub CPhyAddr: *mut c_void,
    pub YVirAddr: *mut c_void,
    pub CVirAddr: *mut c_void,
    pub YSize: c_int,
    pub CSize: c_int,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SSBSIP_MFC_ENC_OUTPUT_INFO {
    pub headerSize: c_int,
    pub dataSize: c_int,
    pub frameType: c_int,
    pub StrmPhyAddr: *mut c_void,
    pub StrmVirAddr: *mut c_void,
}

macro_rules! engine_library {
    ($($name:ident($($arg:ident: $ty:ty),*) -> $ret:ty;)*) => {
        /// Engine entry points resolved from a loaded library.
        ///
        /// Each symbol is resolved independently; a missing symbol is kept
        /// as its lookup error so callers can check for optional entry
        /// points before use.
        pub struct MfcEngineLibrary {
            __library: libloading::Library,
            $(pub $name: Result<unsafe extern "C" fn($($ty),*) -> $ret, libloading::Error>,)*
        }

        impl MfcEngineLibrary {
            /// Load the engine library at `path`.
            ///
            /// # Safety
            ///
            /// Runs the library's initialisers; `path` must name a library
            /// implementing the `mfc_engine.h` ABI.
            pub unsafe fn new(path: &std::ffi::OsStr) -> Result<Self, libloading::Error> {
                let library = unsafe { libloading::Library::new(path)? };
                unsafe { Self::from_library(library) }
            }

            /// Resolve the entry points from an already loaded library.
            ///
            /// # Safety
            ///
            /// The symbols must have the signatures declared in `mfc_engine.h`.
            pub unsafe fn from_library<L>(library: L) -> Result<Self, libloading::Error>
            where
                L: Into<libloading::Library>,
            {
                let __library = library.into();
                $(
                    let $name = unsafe {
                        __library
                            .get(concat!(stringify!($name), "\0").as_bytes())
                            .map(|sym| *sym)
                    };
                )*
                Ok(MfcEngineLibrary { __library, $($name,)* })
            }

            $(
                /// # Safety
                ///
                /// Arguments must satisfy the engine's contract for this call.
                pub unsafe fn $name(&self, $($arg: $ty),*) -> Result<$ret, &libloading::Error> {
                    let func = self.$name.as_ref()?;
                    Ok(unsafe { func($($arg),*) })
                }
            )*
        }
    };
}

engine_library! {
    SsbSipMfcDecOpen() -> *mut c_void;
    SsbSipMfcDecInit(handle: *mut c_void, codec_type: SSBSIP_MFC_CODEC_TYPE, length: c_int) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcDecExe(handle: *mut c_void, length: c_int) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcDecGetInBuf(handle: *mut c_void, phy: *mut *mut c_void, size: c_int) -> *mut c_void;
    SsbSipMfcDecSetInBuf(handle: *mut c_void, phy: *mut c_void, virt: *mut c_void, size: c_int) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcDecGetOutBuf(handle: *mut c_void, info: *mut SSBSIP_MFC_DEC_OUTPUT_INFO) -> SSBSIP_MFC_DEC_OUTBUF_STATUS;
    SsbSipMfcDecSetConfig(handle: *mut c_void, conf_type: c_uint, value: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcDecGetConfig(handle: *mut c_void, conf_type: c_uint, value: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcDecClose(handle: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;

    SsbSipMfcEncOpen() -> *mut c_void;
    SsbSipMfcEncInit(handle: *mut c_void, params: *mut SSBSIP_MFC_ENC_PARAMS) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncExe(handle: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncGetInBuf(handle: *mut c_void, info: *mut SSBSIP_MFC_ENC_INPUT_INFO) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncSetInBuf(handle: *mut c_void, info: *mut SSBSIP_MFC_ENC_INPUT_INFO) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncGetOutBuf(handle: *mut c_void, info: *mut SSBSIP_MFC_ENC_OUTPUT_INFO) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncSetConfig(handle: *mut c_void, conf_type: c_uint, value: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncGetConfig(handle: *mut c_void, conf_type: c_uint, value: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;
    SsbSipMfcEncClose(handle: *mut c_void) -> SSBSIP_MFC_ERROR_CODE;

    SRP_Create(block_mode: c_int) -> c_int;
    SRP_Init(ibuf_size: c_uint) -> c_int;
    SRP_Decode(buff: *mut c_void, size_byte: c_int) -> c_int;
    SRP_Send_EOS() -> c_int;
    SRP_Flush() -> c_int;
    SRP_GetParams(id: c_int, pval: *mut c_ulong) -> c_int;
    SRP_Get_PCM(addr: *mut *mut c_void, size: *mut c_uint) -> c_int;
    SRP_Deinit() -> c_int;
    SRP_Terminate() -> c_int;
}
