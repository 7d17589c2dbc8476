//! Windows display backend
//!
//! Window → `HMONITOR` → GDI device name → D3DKMT adapter handle, with the
//! scan position read through `D3DKMTGetScanLine`. Timing comes from the
//! active `QueryDisplayConfig` path whose source GDI name matches.
#![allow(unsafe_code)]

use std::mem::size_of;

use tracing::{debug, trace};
use windows::core::PCWSTR;
use windows::Wdk::Graphics::Direct3D::{
    D3DKMTCloseAdapter, D3DKMTGetScanLine, D3DKMTOpenAdapterFromHdc, D3DKMT_CLOSEADAPTER,
    D3DKMT_GETSCANLINE, D3DKMT_OPENADAPTERFROMHDC,
};
use windows::Win32::Devices::Display::{
    DisplayConfigGetDeviceInfo, GetDisplayConfigBufferSizes, QueryDisplayConfig,
    DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME, DISPLAYCONFIG_DEVICE_INFO_HEADER,
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_MODE_INFO_TYPE_TARGET, DISPLAYCONFIG_PATH_INFO,
    DISPLAYCONFIG_SOURCE_DEVICE_NAME, QDC_ONLY_ACTIVE_PATHS,
};
use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, ERROR_SUCCESS, HWND};
use windows::Win32::Graphics::Gdi::{
    CreateDCW, DeleteDC, GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITORINFOEXW,
    MONITOR_DEFAULTTONULL,
};

use super::{
    AdapterBinding, AdapterHandle, DisplayBackend, DisplayError, DisplayTiming, OutputDescriptor,
    RefreshRate, Result, ScanPosition, WindowHandle,
};

/// Retries when the display topology changes between sizing and querying
const QUERY_CONFIG_ATTEMPTS: usize = 4;

/// D3DKMT-backed display queries
#[derive(Debug, Default)]
pub struct WindowsDisplay;

impl WindowsDisplay {
    /// Create the backend. Nothing is opened until the first bind.
    pub fn new() -> Self {
        Self
    }
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn query_active_config() -> Result<(Vec<DISPLAYCONFIG_PATH_INFO>, Vec<DISPLAYCONFIG_MODE_INFO>)> {
    for _ in 0..QUERY_CONFIG_ATTEMPTS {
        let mut path_count = 0u32;
        let mut mode_count = 0u32;
        // SAFETY: out pointers are valid for the duration of the call
        let sized = unsafe {
            GetDisplayConfigBufferSizes(QDC_ONLY_ACTIVE_PATHS, &mut path_count, &mut mode_count)
        };
        if sized != ERROR_SUCCESS {
            return Err(DisplayError::TimingQueryFailed(format!(
                "GetDisplayConfigBufferSizes: {:?}",
                sized
            )));
        }

        let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
        let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
        // SAFETY: buffers are sized to the counts passed in
        let queried = unsafe {
            QueryDisplayConfig(
                QDC_ONLY_ACTIVE_PATHS,
                &mut path_count,
                paths.as_mut_ptr(),
                &mut mode_count,
                modes.as_mut_ptr(),
                None,
            )
        };
        if queried == ERROR_INSUFFICIENT_BUFFER {
            trace!("Display topology changed during query, retrying");
            continue;
        }
        if queried != ERROR_SUCCESS {
            return Err(DisplayError::TimingQueryFailed(format!(
                "QueryDisplayConfig: {:?}",
                queried
            )));
        }
        paths.truncate(path_count as usize);
        modes.truncate(mode_count as usize);
        return Ok((paths, modes));
    }
    Err(DisplayError::TimingQueryFailed(
        "display topology kept changing".into(),
    ))
}

fn source_gdi_name(path: &DISPLAYCONFIG_PATH_INFO) -> Option<String> {
    let mut source = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
            size: size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32,
            adapterId: path.sourceInfo.adapterId,
            id: path.sourceInfo.id,
        },
        ..Default::default()
    };
    // SAFETY: header describes the enclosing struct's type and size
    let status = unsafe { DisplayConfigGetDeviceInfo(&mut source.header) };
    (status == 0).then(|| wide_to_string(&source.viewGdiDeviceName))
}

impl DisplayBackend for WindowsDisplay {
    fn backend_name(&self) -> &'static str {
        "d3dkmt"
    }

    fn resolve_output(&self, window: WindowHandle) -> Result<OutputDescriptor> {
        let hwnd = HWND(window.0 as *mut _);
        // SAFETY: MonitorFromWindow tolerates invalid handles
        let monitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONULL) };
        if monitor.is_invalid() {
            return Err(DisplayError::NoOutputForWindow(window.0));
        }

        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = size_of::<MONITORINFOEXW>() as u32;
        // SAFETY: cbSize announces the extended struct
        let ok = unsafe { GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO) };
        if !ok.as_bool() {
            return Err(DisplayError::NoOutputForWindow(window.0));
        }

        Ok(OutputDescriptor {
            name: wide_to_string(&info.szDevice),
            native_handle: monitor.0 as usize,
        })
    }

    fn open_adapter(&self, output: &OutputDescriptor) -> Result<AdapterBinding> {
        let device = to_wide(&output.name);
        // SAFETY: device is NUL terminated and outlives the call
        let hdc = unsafe { CreateDCW(PCWSTR::null(), PCWSTR(device.as_ptr()), PCWSTR::null(), None) };
        if hdc.is_invalid() {
            return Err(DisplayError::AdapterOpenFailed {
                output: output.name.clone(),
                reason: "CreateDCW failed".into(),
            });
        }

        let mut open = D3DKMT_OPENADAPTERFROMHDC {
            hDc: hdc,
            ..Default::default()
        };
        // SAFETY: open.hDc is a live DC for the duration of the call
        let status = unsafe { D3DKMTOpenAdapterFromHdc(&mut open) };
        // SAFETY: hdc came from CreateDCW above
        let _ = unsafe { DeleteDC(hdc) };

        if !status.is_ok() {
            return Err(DisplayError::AdapterOpenFailed {
                output: output.name.clone(),
                reason: format!("D3DKMTOpenAdapterFromHdc: {:#x}", status.0),
            });
        }

        Ok(AdapterBinding {
            adapter: AdapterHandle(open.hAdapter),
            source_id: open.VidPnSourceId,
            output_name: output.name.clone(),
        })
    }

    fn close_adapter(&self, binding: &AdapterBinding) {
        let close = D3DKMT_CLOSEADAPTER {
            hAdapter: binding.adapter.0,
        };
        // SAFETY: handle was returned by D3DKMTOpenAdapterFromHdc and is closed once
        let status = unsafe { D3DKMTCloseAdapter(&close) };
        if !status.is_ok() {
            debug!("D3DKMTCloseAdapter({:?}) failed: {:#x}", binding.adapter, status.0);
        }
    }

    fn scan_position(&self, binding: &AdapterBinding) -> Result<ScanPosition> {
        let mut query = D3DKMT_GETSCANLINE {
            hAdapter: binding.adapter.0,
            VidPnSourceId: binding.source_id,
            ..Default::default()
        };
        // SAFETY: query points at a valid, initialized struct
        let status = unsafe { D3DKMTGetScanLine(&mut query) };
        if !status.is_ok() {
            return Err(DisplayError::ScanlineQueryFailed(format!(
                "D3DKMTGetScanLine: {:#x}",
                status.0
            )));
        }
        Ok(ScanPosition {
            scanline: query.ScanLine,
            in_vblank: query.InVerticalBlank.as_bool(),
        })
    }

    fn query_timing(&self, output: &OutputDescriptor) -> Result<DisplayTiming> {
        let (paths, modes) = query_active_config()?;

        for path in &paths {
            if source_gdi_name(path).as_deref() != Some(output.name.as_str()) {
                continue;
            }
            // SAFETY: modeInfoIdx is the active union member without the virtual mode flag
            let idx = unsafe { path.targetInfo.Anonymous.modeInfoIdx } as usize;
            let Some(mode) = modes.get(idx) else {
                continue;
            };
            if mode.infoType != DISPLAYCONFIG_MODE_INFO_TYPE_TARGET {
                continue;
            }
            // SAFETY: infoType says this is a target mode
            let signal = unsafe { mode.Anonymous.targetMode.targetVideoSignalInfo };
            return Ok(DisplayTiming {
                total_scanlines: signal.totalSize.cy,
                active_scanlines: signal.activeSize.cy,
                refresh: RefreshRate::new(signal.vSyncFreq.Numerator, signal.vSyncFreq.Denominator),
            });
        }

        Err(DisplayError::OutputNotFound(output.name.clone()))
    }
}
