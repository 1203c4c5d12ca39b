use tracing::{debug, info, warn};
use windows::core::{Interface, GUID};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::DirectShow::{
    IAMStreamConfig, IBaseFilter, ICreateDevEnum, PINDIR_OUTPUT,
};
use windows::Win32::Media::MediaFoundation::{
    CLSID_SystemDeviceEnum, CLSID_VideoInputDeviceCategory, FORMAT_VideoInfo, AM_MEDIA_TYPE,
    VIDEOINFOHEADER,
};
use windows::Win32::System::Com::StructuredStorage::IPropertyBag;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, IBindCtx, IMoniker,
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED,
};
use windows::Win32::System::Variant::VARIANT;

use crate::camera::backend::{CaptureBackend, CaptureDevice};
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{CameraDevice, FormatCapability};
use crate::capture::graph::directshow::DirectShowGraph;
use crate::capture::graph::GraphRuntime;

/// Raw device info extracted from DirectShow enumeration.
#[derive(Debug, Clone)]
pub struct RawDeviceInfo {
    pub friendly_name: String,
    pub device_path: String,
}

/// Trait wrapping COM device enumeration for unit-testability.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate_raw(&self) -> Result<Vec<RawDeviceInfo>>;
}

/// Real DirectShow device enumerator.
pub struct DirectShowEnumerator;

impl DeviceEnumerator for DirectShowEnumerator {
    fn enumerate_raw(&self) -> Result<Vec<RawDeviceInfo>> {
        let _guard = ComGuard::init()?;
        let mut devices = Vec::new();
        unsafe {
            for_each_video_moniker(|moniker| {
                if let Some(raw) = read_device_info(moniker) {
                    debug!(
                        "Discovered device: name={}, path={}",
                        raw.friendly_name, raw.device_path
                    );
                    devices.push(raw);
                }
                false
            })?;
        }
        Ok(devices)
    }
}

/// COM thread guard pairing CoInitializeEx with CoUninitialize.
///
/// A thread already in a single-threaded apartment keeps it; the guard then
/// leaves uninitialisation to whoever owns that apartment.
pub(crate) struct ComGuard {
    owns_apartment: bool,
}

impl ComGuard {
    pub(crate) fn init() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            debug!("COM already initialised as STA on this thread");
            return Ok(Self {
                owns_apartment: false,
            });
        }
        if hr.is_err() {
            return Err(CaptureError::ComInit(format!(
                "CoInitializeEx failed: {hr:?}"
            )));
        }
        Ok(Self {
            owns_apartment: true,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.owns_apartment {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Walk the video input category, calling `visit` per moniker until it
/// returns `true`. An empty category is not an error.
unsafe fn for_each_video_moniker(mut visit: impl FnMut(&IMoniker) -> bool) -> Result<()> {
    let dev_enum: ICreateDevEnum =
        CoCreateInstance(&CLSID_SystemDeviceEnum, None, CLSCTX_INPROC_SERVER).map_err(|e| {
            CaptureError::Enumeration(format!("CoCreateInstance(SystemDeviceEnum) failed: {e}"))
        })?;

    let mut enum_moniker = None;
    dev_enum
        .CreateClassEnumerator(&CLSID_VideoInputDeviceCategory, &mut enum_moniker, 0)
        .map_err(|e| CaptureError::Enumeration(format!("CreateClassEnumerator failed: {e}")))?;

    // S_FALSE leaves the enumerator unset when the category is empty
    let Some(enum_moniker) = enum_moniker else {
        return Ok(());
    };

    let mut moniker_array = [None; 1];
    loop {
        if enum_moniker.Next(&mut moniker_array, None).is_err() {
            break;
        }
        let Some(moniker) = moniker_array[0].take() else {
            break;
        };
        if visit(&moniker) {
            break;
        }
    }
    Ok(())
}

unsafe fn read_device_info(moniker: &IMoniker) -> Option<RawDeviceInfo> {
    let bag: IPropertyBag = match moniker.BindToStorage(None::<&IBindCtx>, None::<&IMoniker>) {
        Ok(b) => b,
        Err(e) => {
            warn!("BindToStorage failed for a device: {e}");
            return None;
        }
    };

    Some(RawDeviceInfo {
        friendly_name: read_property_string(&bag, "FriendlyName")
            .unwrap_or_else(|| "Unknown Camera".to_string()),
        device_path: read_property_string(&bag, "DevicePath").unwrap_or_default(),
    })
}

unsafe fn bind_filter(moniker: &IMoniker) -> Result<IBaseFilter> {
    moniker
        .BindToObject(None::<&IBindCtx>, None::<&IMoniker>)
        .map_err(|e| CaptureError::DeviceNotFound(format!("BindToObject failed: {e}")))
}

/// Read a string property from an `IPropertyBag`.
unsafe fn read_property_string(bag: &IPropertyBag, name: &str) -> Option<String> {
    use windows::core::BSTR;

    let prop_name = BSTR::from(name);
    let mut variant = VARIANT::default();

    bag.Read(
        windows::core::PCWSTR(prop_name.as_ptr()),
        &mut variant,
        None,
    )
    .ok()?;

    // VARIANT layout: 8-byte header, then the bstrVal union member
    let bstr_ptr: *const *const u16 = std::ptr::addr_of!(variant).cast::<u8>().add(8).cast();
    let raw_bstr = *bstr_ptr;
    if raw_bstr.is_null() {
        return None;
    }

    // BSTR byte length sits 4 bytes before the pointer
    let len_ptr = (raw_bstr as *const u8).sub(4) as *const u32;
    let char_len = *len_ptr as usize / 2;

    let slice = std::slice::from_raw_parts(raw_bstr, char_len);
    Some(String::from_utf16_lossy(slice))
}

/// Windows capture backend using DirectShow.
pub struct WindowsBackend {
    enumerator: Box<dyn DeviceEnumerator>,
}

impl WindowsBackend {
    pub fn new() -> Self {
        Self {
            enumerator: Box::new(DirectShowEnumerator),
        }
    }

    /// Create a backend with a custom enumerator (for testing).
    pub fn with_enumerator(enumerator: Box<dyn DeviceEnumerator>) -> Self {
        Self { enumerator }
    }

    fn make_device(raw: &RawDeviceInfo) -> CameraDevice {
        CameraDevice::new(raw.friendly_name.clone(), raw.device_path.clone())
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for WindowsBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        let devices: Vec<CameraDevice> = self
            .enumerator
            .enumerate_raw()?
            .iter()
            .map(Self::make_device)
            .collect();
        info!("Enumerated {} video input device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CaptureDevice>> {
        let com = ComGuard::init()?;
        let mut bound = None;
        unsafe {
            for_each_video_moniker(|moniker| {
                let Some(raw) = read_device_info(moniker) else {
                    return false;
                };
                // Virtual cameras may lack a DevicePath; match those by name
                let matched = if device.device_path.is_empty() {
                    raw.device_path.is_empty() && raw.friendly_name == device.name
                } else {
                    raw.device_path == device.device_path
                };
                if matched {
                    bound = Some(bind_filter(moniker));
                }
                matched
            })?;
        }

        let filter = bound.ok_or_else(|| CaptureError::DeviceNotFound(device.name.clone()))??;
        Ok(Box::new(DirectShowDevice {
            info: device.clone(),
            filter,
            _com: com,
        }))
    }

    /// Single pass over the category: the first moniker that binds wins.
    fn locate(&self) -> Result<Box<dyn CaptureDevice>> {
        let com = ComGuard::init().map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;
        let mut found = None;
        unsafe {
            for_each_video_moniker(|moniker| match bind_filter(moniker) {
                Ok(filter) => {
                    let raw = read_device_info(moniker).unwrap_or(RawDeviceInfo {
                        friendly_name: "Unknown Camera".to_string(),
                        device_path: String::new(),
                    });
                    found = Some((Self::make_device(&raw), filter));
                    true
                }
                Err(e) => {
                    debug!("Skipping device: {e}");
                    false
                }
            })
            .map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;
        }

        let (info, filter) = found.ok_or_else(|| {
            CaptureError::DeviceNotFound("no video input device could be bound".to_string())
        })?;
        info!("Using capture device '{}'", info.name);
        Ok(Box::new(DirectShowDevice {
            info,
            filter,
            _com: com,
        }))
    }
}

/// A DirectShow source filter bound from a device moniker.
pub struct DirectShowDevice {
    info: CameraDevice,
    filter: IBaseFilter,
    _com: ComGuard,
}

impl DirectShowDevice {
    /// IAMStreamConfig of the first output pin that exposes one.
    fn stream_config(&self) -> Result<IAMStreamConfig> {
        unsafe {
            let pin_enum = self
                .filter
                .EnumPins()
                .map_err(|e| CaptureError::FormatQuery(format!("EnumPins failed: {e}")))?;

            let mut pin_array = [None; 1];
            loop {
                if pin_enum.Next(&mut pin_array, None).is_err() {
                    break;
                }
                let Some(pin) = pin_array[0].take() else {
                    break;
                };
                match pin.QueryDirection() {
                    Ok(dir) if dir == PINDIR_OUTPUT => {}
                    _ => continue,
                }
                if let Ok(config) = pin.cast::<IAMStreamConfig>() {
                    return Ok(config);
                }
            }
        }
        Err(CaptureError::FormatQuery(
            "no output pin with IAMStreamConfig".to_string(),
        ))
    }
}

impl CaptureDevice for DirectShowDevice {
    fn info(&self) -> &CameraDevice {
        &self.info
    }

    fn stream_capabilities(&self) -> Result<Vec<FormatCapability>> {
        let config = self.stream_config()?;
        let (count, caps_size) = unsafe { capability_count(&config)? };

        let mut capabilities = Vec::with_capacity(count);
        for i in 0..count {
            let Some(mt) = (unsafe { stream_caps(&config, i, caps_size) }) else {
                continue;
            };
            if let Some(cap) = unsafe { capability_from_media_type(&*mt) } {
                capabilities.push(cap);
            }
            unsafe { free_media_type(mt) };
        }
        Ok(capabilities)
    }

    fn current_format(&self) -> Result<FormatCapability> {
        let config = self.stream_config()?;
        unsafe {
            let mt = config
                .GetFormat()
                .map_err(|e| CaptureError::FormatQuery(format!("GetFormat failed: {e}")))?;
            if mt.is_null() {
                return Err(CaptureError::FormatQuery("GetFormat returned null".to_string()));
            }
            let cap = capability_from_media_type(&*mt);
            free_media_type(mt);
            cap.ok_or_else(|| {
                CaptureError::FormatQuery("current format is not FORMAT_VideoInfo".to_string())
            })
        }
    }

    fn apply_format(&self, index: usize, format: &FormatCapability) -> Result<()> {
        let config = self.stream_config()?;
        unsafe {
            let (_, caps_size) = capability_count(&config)?;
            let mt = stream_caps(&config, index, caps_size).ok_or_else(|| {
                CaptureError::FormatQuery(format!("GetStreamCaps({index}) failed"))
            })?;

            let mt_ref = &*mt;
            if mt_ref.formattype == FORMAT_VideoInfo
                && !mt_ref.pbFormat.is_null()
                && mt_ref.cbFormat as usize >= std::mem::size_of::<VIDEOINFOHEADER>()
                && format.frame_interval > 0
            {
                let vih = &mut *(mt_ref.pbFormat as *mut VIDEOINFOHEADER);
                vih.AvgTimePerFrame = format.frame_interval;
            }

            let result = config.SetFormat(mt);
            free_media_type(mt);
            result.map_err(|e| CaptureError::FormatQuery(format!("SetFormat failed: {e}")))
        }
    }

    fn create_graph(&self) -> Result<Box<dyn GraphRuntime>> {
        Ok(Box::new(DirectShowGraph::new(self.filter.clone())?))
    }
}

/// Number of capabilities and the size of their config structure.
unsafe fn capability_count(config: &IAMStreamConfig) -> Result<(usize, usize)> {
    let mut count = 0i32;
    let mut size = 0i32;
    config
        .GetNumberOfCapabilities(&mut count, &mut size)
        .map_err(|e| CaptureError::FormatQuery(format!("GetNumberOfCapabilities failed: {e}")))?;
    Ok((
        usize::try_from(count).unwrap_or(0),
        usize::try_from(size).unwrap_or(0),
    ))
}

unsafe fn stream_caps(
    config: &IAMStreamConfig,
    index: usize,
    caps_size: usize,
) -> Option<*mut AM_MEDIA_TYPE> {
    let index = i32::try_from(index).ok()?;
    let mut scc = vec![0u8; caps_size];
    let mut mt_ptr = std::ptr::null_mut();
    config
        .GetStreamCaps(index, &mut mt_ptr, scc.as_mut_ptr())
        .ok()?;
    (!mt_ptr.is_null()).then_some(mt_ptr)
}

unsafe fn capability_from_media_type(mt: &AM_MEDIA_TYPE) -> Option<FormatCapability> {
    if mt.formattype != FORMAT_VideoInfo
        || mt.pbFormat.is_null()
        || (mt.cbFormat as usize) < std::mem::size_of::<VIDEOINFOHEADER>()
    {
        return None;
    }
    let vih = &*(mt.pbFormat as *const VIDEOINFOHEADER);
    Some(FormatCapability {
        width: vih.bmiHeader.biWidth.unsigned_abs(),
        height: vih.bmiHeader.biHeight.unsigned_abs(),
        frame_interval: vih.AvgTimePerFrame,
        pixel_format: fourcc_to_string(mt.subtype),
    })
}

/// DeleteMediaType: format block, held IUnknown, then the struct.
unsafe fn free_media_type(mt: *mut AM_MEDIA_TYPE) {
    let mt_ref = &mut *mt;
    if !mt_ref.pbFormat.is_null() {
        CoTaskMemFree(Some(mt_ref.pbFormat as *const core::ffi::c_void));
    }
    std::mem::ManuallyDrop::drop(&mut mt_ref.pUnk);
    CoTaskMemFree(Some(mt as *const core::ffi::c_void));
}

/// Convert a media subtype GUID to a FourCC string.
fn fourcc_to_string(guid: GUID) -> String {
    let d1 = guid.data1;
    let bytes = d1.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic()) {
        String::from_utf8_lossy(&bytes).to_string()
    } else {
        format!("{d1:08X}")
    }
}
