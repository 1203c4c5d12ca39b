// Capture pipeline graph.
//
// Models the Source -> Grabber -> Sink chain as role-indexed nodes and
// directed pin connections, and drives a platform runtime through the fixed
// build order: add nodes, pin the grabber format, connect, render, run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::camera::backend::CaptureDevice;
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::PixelDepth;
use crate::capture::slot::FrameSlot;

/// What a node does in the pipeline. Nodes are looked up by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// The bound capture device.
    Source,
    /// The sample grabber that hands frames to the delivery callback.
    Grabber,
    /// Terminal node that discards samples.
    Sink,
}

impl NodeRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Grabber => "Sample Grabber",
            Self::Sink => "Null Renderer",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinDirection {
    Input,
    Output,
}

/// The first unconnected pin of a given direction on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinRef {
    pub role: NodeRole,
    pub direction: PinDirection,
}

impl PinRef {
    pub const fn output(role: NodeRole) -> Self {
        Self {
            role,
            direction: PinDirection::Output,
        }
    }

    pub const fn input(role: NodeRole) -> Self {
        Self {
            role,
            direction: PinDirection::Input,
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            PinDirection::Input => "in",
            PinDirection::Output => "out",
        };
        write!(f, "{}:{dir}", self.role)
    }
}

/// Directed link from an output pin to an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub output: PinRef,
    pub input: PinRef,
}

/// Frame size reported by the grabber's connected media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// End of stream; the one-shot grabber stops after its first sample.
    Completed,
    /// The bounded wait elapsed first.
    TimedOut,
    /// The runtime refused to start or aborted mid-stream.
    Aborted(String),
}

/// Platform side of a pipeline graph.
///
/// [`PipelineGraph`] guarantees call order, so implementations only perform
/// each step.
pub trait GraphRuntime {
    /// Create (if needed) and insert the node for `role`.
    fn add_node(&mut self, role: NodeRole) -> Result<()>;

    /// Restrict the grabber to video of `depth` and put it in one-shot,
    /// callback-only mode.
    fn set_grab_format(&mut self, depth: PixelDepth) -> Result<()>;

    /// Link two existing pins, inserting converters where the runtime can.
    fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()>;

    /// Terminate `output` with a sink node without a visible window.
    fn render(&mut self, output: PinRef) -> Result<()>;

    /// Geometry of the grabber's connected media type, if it is known.
    fn connected_geometry(&self) -> Option<FrameGeometry>;

    /// Install the delivery callback, run to completion (or until `wait`
    /// elapses) and stop.
    fn run(&mut self, slot: Arc<FrameSlot>, wait: Option<Duration>) -> Result<RunOutcome>;

    /// Detach the callback and release every node. Must be idempotent and
    /// must guarantee no further deliveries.
    fn teardown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    Building,
    FormatRequested,
    Connected,
    Rendered,
    Finished,
    TornDown,
}

/// A capture pipeline for one capture.
///
/// Built with the source and grabber in place; the sink joins at render.
/// Teardown runs on drop, so every exit path releases the graph.
pub struct PipelineGraph {
    nodes: Vec<NodeRole>,
    connections: Vec<Connection>,
    state: GraphState,
    runtime: Box<dyn GraphRuntime>,
}

impl PipelineGraph {
    /// Create a graph for `device` holding its source and a grabber.
    pub fn build(device: &dyn CaptureDevice) -> Result<Self> {
        Self::with_runtime(device.create_graph()?)
    }

    pub fn with_runtime(runtime: Box<dyn GraphRuntime>) -> Result<Self> {
        let mut graph = Self {
            nodes: Vec::with_capacity(3),
            connections: Vec::with_capacity(2),
            state: GraphState::Building,
            runtime,
        };
        graph.add_node(NodeRole::Source)?;
        graph.add_node(NodeRole::Grabber)?;
        Ok(graph)
    }

    fn add_node(&mut self, role: NodeRole) -> Result<()> {
        self.runtime.add_node(role)?;
        self.nodes.push(role);
        tracing::debug!("Added {role} to capture graph");
        Ok(())
    }

    /// Pin the grabber's accepted media type. Has to happen before any pin
    /// is connected.
    pub fn request_format(&mut self, depth: PixelDepth) -> Result<()> {
        if self.state != GraphState::Building {
            return Err(CaptureError::PipelineBuild(
                "grabber format must be set before connecting pins".to_string(),
            ));
        }
        self.runtime.set_grab_format(depth)?;
        self.state = GraphState::FormatRequested;
        Ok(())
    }

    /// Link `output` to `input`.
    pub fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()> {
        if self.state != GraphState::FormatRequested {
            return Err(CaptureError::Connection(format!(
                "cannot connect {output} -> {input} in state {:?}",
                self.state
            )));
        }
        self.check_free_pin(output, PinDirection::Output)
            .and_then(|()| self.check_free_pin(input, PinDirection::Input))
            .map_err(CaptureError::Connection)?;

        self.runtime.connect(output, input)?;
        self.connections.push(Connection { output, input });
        self.state = GraphState::Connected;
        tracing::debug!("Connected {output} -> {input}");
        Ok(())
    }

    /// Complete the path downstream of `output` with the sink.
    pub fn render(&mut self, output: PinRef) -> Result<()> {
        if self.state != GraphState::Connected {
            return Err(CaptureError::RenderPath(format!(
                "cannot render {output} in state {:?}",
                self.state
            )));
        }
        self.check_free_pin(output, PinDirection::Output)
            .map_err(CaptureError::RenderPath)?;

        self.runtime.render(output)?;
        self.nodes.push(NodeRole::Sink);
        self.connections.push(Connection {
            output,
            input: PinRef::input(NodeRole::Sink),
        });
        self.state = GraphState::Rendered;
        tracing::debug!("Rendered {output}");
        Ok(())
    }

    /// Dimensions the grabber actually negotiated, once connected.
    pub fn connected_geometry(&self) -> Option<FrameGeometry> {
        match self.state {
            GraphState::Connected | GraphState::Rendered | GraphState::Finished => {
                self.runtime.connected_geometry()
            }
            _ => None,
        }
    }

    /// Run once, blocking until completion or until `wait` elapses.
    pub fn run(&mut self, slot: &Arc<FrameSlot>, wait: Option<Duration>) -> Result<RunOutcome> {
        if self.state != GraphState::Rendered {
            return Err(CaptureError::Run(format!(
                "graph is not ready to run (state {:?})",
                self.state
            )));
        }
        let outcome = self.runtime.run(Arc::clone(slot), wait)?;
        self.state = GraphState::Finished;
        Ok(outcome)
    }

    /// Release the graph. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.state == GraphState::TornDown {
            return;
        }
        self.runtime.teardown();
        self.state = GraphState::TornDown;
        tracing::debug!("Capture graph torn down");
    }

    pub fn node(&self, role: NodeRole) -> Option<NodeRole> {
        self.nodes.iter().copied().find(|r| *r == role)
    }

    pub fn nodes(&self) -> &[NodeRole] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_connected(&self, pin: PinRef) -> bool {
        self.connections
            .iter()
            .any(|c| c.output == pin || c.input == pin)
    }

    fn check_free_pin(
        &self,
        pin: PinRef,
        direction: PinDirection,
    ) -> std::result::Result<(), String> {
        if pin.direction != direction {
            return Err(format!("{pin} has the wrong direction"));
        }
        if self.node(pin.role).is_none() {
            return Err(format!("no {} node in the graph", pin.role));
        }
        if self.is_connected(pin) {
            return Err(format!("{pin} is already connected"));
        }
        Ok(())
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(target_os = "windows")]
pub mod directshow {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tracing::{debug, info, warn};
    use windows::core::{w, Interface, GUID, HRESULT};
    use windows::Win32::Foundation::{E_ABORT, E_NOINTERFACE, E_OUTOFMEMORY, E_POINTER, S_OK};
    use windows::Win32::Media::DirectShow::{
        IBaseFilter, IGraphBuilder, IMediaControl, IMediaEvent, IPin, IVideoWindow,
    };
    use windows::Win32::Media::MediaFoundation::VIDEOINFOHEADER;
    use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_INPROC_SERVER};

    use super::{FrameGeometry, GraphRuntime, NodeRole, PinDirection, PinRef, RunOutcome};
    use crate::camera::error::{CaptureError, Result};
    use crate::camera::platform::windows::ComGuard;
    use crate::camera::types::PixelDepth;
    use crate::capture::slot::{DeliveryError, FrameSlot};

    /// AM_MEDIA_TYPE, laid out as in strmif.h.
    #[repr(C)]
    pub struct AmMediaType {
        pub major_type: GUID,
        pub sub_type: GUID,
        pub fixed_size_samples: i32,
        pub temporal_compression: i32,
        pub sample_size: u32,
        pub format_type: GUID,
        pub unk: usize,
        pub cb_format: u32,
        pub pb_format: *mut u8,
    }

    impl Default for AmMediaType {
        fn default() -> Self {
            Self {
                major_type: GUID::zeroed(),
                sub_type: GUID::zeroed(),
                fixed_size_samples: 0,
                temporal_compression: 0,
                sample_size: 0,
                format_type: GUID::zeroed(),
                unk: 0,
                cb_format: 0,
                pb_format: std::ptr::null_mut(),
            }
        }
    }

    impl AmMediaType {
        /// Frame size from a VIDEOINFOHEADER format block.
        unsafe fn geometry(&self) -> Option<FrameGeometry> {
            if self.pb_format.is_null()
                || (self.cb_format as usize) < std::mem::size_of::<VIDEOINFOHEADER>()
            {
                return None;
            }
            let vih = &*(self.pb_format as *const VIDEOINFOHEADER);
            Some(FrameGeometry {
                width: vih.bmiHeader.biWidth.unsigned_abs(),
                height: vih.bmiHeader.biHeight.unsigned_abs(),
            })
        }

        /// Free the format block (FreeMediaType without the struct itself).
        unsafe fn free_format(&mut self) {
            if !self.pb_format.is_null() {
                CoTaskMemFree(Some(self.pb_format as *const core::ffi::c_void));
                self.pb_format = std::ptr::null_mut();
                self.cb_format = 0;
            }
        }
    }

    // IUnknown: {00000000-0000-0000-C000-000000000046}
    const IID_IUNKNOWN: GUID = GUID::from_u128(0x00000000_0000_0000_C000_000000000046);

    // ISampleGrabberCB: {0579154A-2B53-4994-B0D0-E773148EFF85}
    const IID_ISAMPLEGRABBER_CB: GUID = GUID::from_u128(0x0579154A_2B53_4994_B0D0_E773148EFF85);

    // ISampleGrabber: {6B652FFF-11FE-4FCE-92AD-0266B5D7C78F}
    const IID_ISAMPLEGRABBER: GUID = GUID::from_u128(0x6B652FFF_11FE_4FCE_92AD_0266B5D7C78F);

    // CLSID_SampleGrabber: {C1F400A0-3F08-11D3-9F0B-006008039E37}
    const CLSID_SAMPLE_GRABBER: GUID = GUID::from_u128(0xC1F400A0_3F08_11D3_9F0B_006008039E37);

    // CLSID_NullRenderer: {C1F400A4-3F08-11D3-9F0B-006008039E37}
    const CLSID_NULL_RENDERER: GUID = GUID::from_u128(0xC1F400A4_3F08_11D3_9F0B_006008039E37);

    // CLSID_FilterGraph: {E436EBB3-524F-11CE-9F53-0020AF0BA770}
    const CLSID_FILTER_GRAPH: GUID = GUID::from_u128(0xE436EBB3_524F_11CE_9F53_0020AF0BA770);

    // MEDIATYPE_Video: {73646976-0000-0010-8000-00AA00389B71}
    const MEDIATYPE_VIDEO: GUID = GUID::from_u128(0x73646976_0000_0010_8000_00AA00389B71);

    // MEDIASUBTYPE_RGB24: {E436EB7D-524F-11CE-9F53-0020AF0BA770}
    const MEDIASUBTYPE_RGB24: GUID = GUID::from_u128(0xE436EB7D_524F_11CE_9F53_0020AF0BA770);

    // MEDIASUBTYPE_ARGB32: {773C9AC0-3274-11D0-B724-00AA006C1A01}
    const MEDIASUBTYPE_ARGB32: GUID = GUID::from_u128(0x773C9AC0_3274_11D0_B724_00AA006C1A01);

    // Media event codes (evcode.h)
    const EC_COMPLETE: i32 = 0x01;
    const EC_USERABORT: i32 = 0x02;
    const EC_ERRORABORT: i32 = 0x03;

    const INFINITE_WAIT: i32 = -1;
    const OA_FALSE: i32 = 0;

    // SetCallback mode: BufferCB
    const BUFFER_CALLBACK: i32 = 1;

    fn subtype_for(depth: PixelDepth) -> GUID {
        match depth {
            PixelDepth::Rgb24 => MEDIASUBTYPE_RGB24,
            PixelDepth::Argb32 => MEDIASUBTYPE_ARGB32,
        }
    }

    // --- ISampleGrabber raw COM interface ---

    #[repr(C)]
    struct ISampleGrabberVtbl {
        query_interface: unsafe extern "system" fn(
            *mut core::ffi::c_void,
            *const GUID,
            *mut *mut core::ffi::c_void,
        ) -> HRESULT,
        add_ref: unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
        release: unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
        set_one_shot: unsafe extern "system" fn(*mut core::ffi::c_void, i32) -> HRESULT,
        set_media_type:
            unsafe extern "system" fn(*mut core::ffi::c_void, *const AmMediaType) -> HRESULT,
        get_connected_media_type:
            unsafe extern "system" fn(*mut core::ffi::c_void, *mut AmMediaType) -> HRESULT,
        set_buffer_samples: unsafe extern "system" fn(*mut core::ffi::c_void, i32) -> HRESULT,
        get_current_buffer:
            unsafe extern "system" fn(*mut core::ffi::c_void, *mut i32, *mut u8) -> HRESULT,
        get_current_sample: unsafe extern "system" fn(
            *mut core::ffi::c_void,
            *mut *mut core::ffi::c_void,
        ) -> HRESULT,
        set_callback: unsafe extern "system" fn(
            *mut core::ffi::c_void,
            *mut core::ffi::c_void,
            i32,
        ) -> HRESULT,
    }

    /// Owned ISampleGrabber pointer; windows-rs has no binding for it.
    struct SampleGrabber {
        ptr: *mut core::ffi::c_void,
    }

    impl SampleGrabber {
        unsafe fn from_filter(filter: &IBaseFilter) -> Option<Self> {
            let mut result: *mut core::ffi::c_void = std::ptr::null_mut();
            let hr = filter.query(&IID_ISAMPLEGRABBER, &mut result);
            if hr.is_ok() && !result.is_null() {
                Some(Self { ptr: result })
            } else {
                None
            }
        }

        unsafe fn vtbl(&self) -> &ISampleGrabberVtbl {
            &*(*(self.ptr as *const *const ISampleGrabberVtbl))
        }

        unsafe fn set_media_type(&self, mt: &AmMediaType) -> HRESULT {
            (self.vtbl().set_media_type)(self.ptr, mt)
        }

        unsafe fn set_one_shot(&self, one_shot: bool) -> HRESULT {
            (self.vtbl().set_one_shot)(self.ptr, i32::from(one_shot))
        }

        unsafe fn set_buffer_samples(&self, buffer: bool) -> HRESULT {
            (self.vtbl().set_buffer_samples)(self.ptr, i32::from(buffer))
        }

        unsafe fn set_callback(&self, callback: *mut core::ffi::c_void, which: i32) -> HRESULT {
            (self.vtbl().set_callback)(self.ptr, callback, which)
        }

        unsafe fn get_connected_media_type(&self, mt: &mut AmMediaType) -> HRESULT {
            (self.vtbl().get_connected_media_type)(self.ptr, mt)
        }
    }

    impl Drop for SampleGrabber {
        fn drop(&mut self) {
            unsafe {
                (self.vtbl().release)(self.ptr);
            }
        }
    }

    // --- ISampleGrabberCB implementation ---

    #[repr(C)]
    struct ISampleGrabberCBVtbl {
        query_interface: unsafe extern "system" fn(
            *mut core::ffi::c_void,
            *const GUID,
            *mut *mut core::ffi::c_void,
        ) -> HRESULT,
        add_ref: unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
        release: unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
        sample_cb: unsafe extern "system" fn(
            *mut core::ffi::c_void,
            f64,
            *mut core::ffi::c_void,
        ) -> HRESULT,
        buffer_cb: unsafe extern "system" fn(*mut core::ffi::c_void, f64, *mut u8, i32) -> HRESULT,
    }

    /// COM object backing our ISampleGrabberCB. Holds a share of the
    /// session's frame slot and nothing else.
    #[repr(C)]
    struct DeliveryCallback {
        vtbl: *const ISampleGrabberCBVtbl,
        ref_count: AtomicU32,
        slot: Arc<FrameSlot>,
    }

    static DELIVERY_CALLBACK_VTBL: ISampleGrabberCBVtbl = ISampleGrabberCBVtbl {
        query_interface: delivery_cb_query_interface,
        add_ref: delivery_cb_add_ref,
        release: delivery_cb_release,
        sample_cb: delivery_cb_sample_cb,
        buffer_cb: delivery_cb_buffer_cb,
    };

    unsafe extern "system" fn delivery_cb_query_interface(
        this: *mut core::ffi::c_void,
        riid: *const GUID,
        ppv: *mut *mut core::ffi::c_void,
    ) -> HRESULT {
        if ppv.is_null() {
            return E_POINTER;
        }
        let iid = &*riid;
        if *iid == IID_ISAMPLEGRABBER_CB || *iid == IID_IUNKNOWN {
            *ppv = this;
            delivery_cb_add_ref(this);
            S_OK
        } else {
            *ppv = std::ptr::null_mut();
            E_NOINTERFACE
        }
    }

    unsafe extern "system" fn delivery_cb_add_ref(this: *mut core::ffi::c_void) -> u32 {
        let data = &*(this as *const DeliveryCallback);
        data.ref_count.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    unsafe extern "system" fn delivery_cb_release(this: *mut core::ffi::c_void) -> u32 {
        let data = &*(this as *const DeliveryCallback);
        let prev = data.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            drop(Box::from_raw(this as *mut DeliveryCallback));
            return 0;
        }
        prev - 1
    }

    unsafe extern "system" fn delivery_cb_sample_cb(
        _this: *mut core::ffi::c_void,
        _sample_time: f64,
        _sample: *mut core::ffi::c_void,
    ) -> HRESULT {
        // Registered in BufferCB mode only
        S_OK
    }

    /// Streaming-thread entry point. No logging here: the slot records
    /// everything the caller needs.
    unsafe extern "system" fn delivery_cb_buffer_cb(
        this: *mut core::ffi::c_void,
        sample_time: f64,
        buffer: *mut u8,
        buffer_len: i32,
    ) -> HRESULT {
        let data = &*(this as *const DeliveryCallback);

        let sample = if buffer.is_null() {
            None
        } else {
            let len = usize::try_from(buffer_len).unwrap_or(0);
            Some(std::slice::from_raw_parts(buffer as *const u8, len))
        };

        match data.slot.deliver(sample_time, sample) {
            Ok(()) => S_OK,
            Err(DeliveryError::NullPointer) => E_POINTER,
            Err(DeliveryError::OutOfMemory(_)) => E_OUTOFMEMORY,
        }
    }

    fn create_delivery_callback(slot: Arc<FrameSlot>) -> *mut core::ffi::c_void {
        let data = Box::new(DeliveryCallback {
            vtbl: &DELIVERY_CALLBACK_VTBL,
            ref_count: AtomicU32::new(1),
            slot,
        });
        Box::into_raw(data) as *mut core::ffi::c_void
    }

    /// DirectShow filter graph around one bound source filter.
    pub struct DirectShowGraph {
        graph: Option<IGraphBuilder>,
        source: Option<IBaseFilter>,
        grabber_filter: Option<IBaseFilter>,
        grabber: Option<SampleGrabber>,
        sink: Option<IBaseFilter>,
        callback_installed: bool,
        _com: ComGuard,
    }

    impl DirectShowGraph {
        /// Create an empty filter graph for `source`.
        pub fn new(source: IBaseFilter) -> Result<Self> {
            let com = ComGuard::init()?;
            let graph: IGraphBuilder =
                unsafe { CoCreateInstance(&CLSID_FILTER_GRAPH, None, CLSCTX_INPROC_SERVER) }
                    .map_err(|e| {
                        CaptureError::PipelineBuild(format!("failed to create filter graph: {e}"))
                    })?;
            Ok(Self {
                graph: Some(graph),
                source: Some(source),
                grabber_filter: None,
                grabber: None,
                sink: None,
                callback_installed: false,
                _com: com,
            })
        }

        fn graph(&self) -> Result<&IGraphBuilder> {
            self.graph
                .as_ref()
                .ok_or_else(|| CaptureError::PipelineBuild("graph already released".to_string()))
        }

        fn grabber(&self) -> Result<&SampleGrabber> {
            self.grabber.as_ref().ok_or_else(|| {
                CaptureError::PipelineBuild("sample grabber not in graph".to_string())
            })
        }

        fn filter(&self, role: NodeRole) -> Option<&IBaseFilter> {
            match role {
                NodeRole::Source => self.source.as_ref(),
                NodeRole::Grabber => self.grabber_filter.as_ref(),
                NodeRole::Sink => self.sink.as_ref(),
            }
        }

        fn pin(&self, pin: PinRef) -> Result<IPin> {
            let filter = self.filter(pin.role).ok_or_else(|| {
                CaptureError::Connection(format!("no {} filter in graph", pin.role))
            })?;
            unsafe { find_unconnected_pin(filter, pin.direction) }
        }

        fn create_filter(&self, clsid: &GUID, role: NodeRole) -> Result<IBaseFilter> {
            let filter: IBaseFilter =
                unsafe { CoCreateInstance(clsid, None, CLSCTX_INPROC_SERVER) }.map_err(|e| {
                    CaptureError::PipelineBuild(format!("failed to create {role}: {e}"))
                })?;
            self.add_filter(&filter, role)?;
            Ok(filter)
        }

        fn add_filter(&self, filter: &IBaseFilter, role: NodeRole) -> Result<()> {
            let name = match role {
                NodeRole::Source => w!("Source"),
                NodeRole::Grabber => w!("Sample Grabber"),
                NodeRole::Sink => w!("Null Renderer"),
            };
            unsafe { self.graph()?.AddFilter(filter, name) }
                .map_err(|e| CaptureError::PipelineBuild(format!("failed to add {role}: {e}")))
        }
    }

    impl GraphRuntime for DirectShowGraph {
        fn add_node(&mut self, role: NodeRole) -> Result<()> {
            match role {
                NodeRole::Source => {
                    let source = self.source.clone().ok_or_else(|| {
                        CaptureError::PipelineBuild("source filter released".to_string())
                    })?;
                    self.add_filter(&source, role)
                }
                NodeRole::Grabber => {
                    let filter = self.create_filter(&CLSID_SAMPLE_GRABBER, role)?;
                    let grabber = unsafe { SampleGrabber::from_filter(&filter) }.ok_or_else(|| {
                        CaptureError::PipelineBuild("failed to query ISampleGrabber".to_string())
                    })?;
                    self.grabber_filter = Some(filter);
                    self.grabber = Some(grabber);
                    Ok(())
                }
                NodeRole::Sink => {
                    self.sink = Some(self.create_filter(&CLSID_NULL_RENDERER, role)?);
                    Ok(())
                }
            }
        }

        fn set_grab_format(&mut self, depth: PixelDepth) -> Result<()> {
            let grabber = self.grabber()?;
            let mt = AmMediaType {
                major_type: MEDIATYPE_VIDEO,
                sub_type: subtype_for(depth),
                ..AmMediaType::default()
            };
            let step = |what: &str, hr: HRESULT| {
                hr.ok()
                    .map_err(|e| CaptureError::PipelineBuild(format!("{what} failed: {e}")))
            };
            unsafe {
                step("SetMediaType", grabber.set_media_type(&mt))?;
                step("SetBufferSamples", grabber.set_buffer_samples(false))?;
                step("SetOneShot", grabber.set_one_shot(true))?;
            }
            debug!("Grabber restricted to {depth} video, one-shot");
            Ok(())
        }

        fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()> {
            let out_pin = self.pin(output)?;
            let in_pin = self.pin(input)?;
            unsafe { self.graph()?.Connect(&out_pin, &in_pin) }
                .map_err(|e| CaptureError::Connection(format!("{output} -> {input}: {e}")))
        }

        fn render(&mut self, output: PinRef) -> Result<()> {
            self.add_node(NodeRole::Sink)
                .map_err(|e| CaptureError::RenderPath(e.to_string()))?;
            let out_pin = self.pin(output)?;
            let in_pin = self.pin(PinRef::input(NodeRole::Sink))?;
            unsafe { self.graph()?.Connect(&out_pin, &in_pin) }
                .map_err(|e| CaptureError::RenderPath(format!("{output}: {e}")))?;

            // Only present when something pulled a video renderer into the graph
            if let Ok(window) = self.graph()?.cast::<IVideoWindow>() {
                if let Err(e) = unsafe { window.SetAutoShow(OA_FALSE) } {
                    debug!("SetAutoShow(false) ignored: {e}");
                }
            }
            Ok(())
        }

        fn connected_geometry(&self) -> Option<FrameGeometry> {
            let grabber = self.grabber.as_ref()?;
            let mut mt = AmMediaType::default();
            unsafe {
                let hr = grabber.get_connected_media_type(&mut mt);
                let geometry = if hr.is_ok() { mt.geometry() } else { None };
                mt.free_format();
                geometry
            }
        }

        fn run(&mut self, slot: Arc<FrameSlot>, wait: Option<Duration>) -> Result<RunOutcome> {
            let graph = self.graph()?.clone();
            let grabber = self.grabber()?;

            unsafe {
                let callback = create_delivery_callback(slot);
                let hr = grabber.set_callback(callback, BUFFER_CALLBACK);
                // The grabber holds its own reference on success
                delivery_cb_release(callback);
                hr.ok()
                    .map_err(|e| CaptureError::Run(format!("SetCallback failed: {e}")))?;
            }
            self.callback_installed = true;

            let control: IMediaControl = graph
                .cast()
                .map_err(|e| CaptureError::Run(format!("failed to get IMediaControl: {e}")))?;
            let events: IMediaEvent = graph
                .cast()
                .map_err(|e| CaptureError::Run(format!("failed to get IMediaEvent: {e}")))?;

            if let Err(e) = unsafe { control.Run() } {
                warn!("Graph refused to run: {e}");
                unsafe {
                    let _ = control.Stop();
                }
                return Ok(RunOutcome::Aborted(e.to_string()));
            }
            info!("Capture graph running");

            let timeout_ms = wait.map_or(INFINITE_WAIT, |d| {
                i32::try_from(d.as_millis()).unwrap_or(i32::MAX)
            });
            let outcome = match unsafe { events.WaitForCompletion(timeout_ms) } {
                Ok(EC_COMPLETE) => RunOutcome::Completed,
                Ok(code @ (EC_USERABORT | EC_ERRORABORT)) => {
                    RunOutcome::Aborted(format!("event code {code:#x}"))
                }
                Ok(code) => {
                    debug!("WaitForCompletion returned event code {code:#x}");
                    RunOutcome::Completed
                }
                Err(e) if e.code() == E_ABORT => RunOutcome::TimedOut,
                Err(e) => RunOutcome::Aborted(e.to_string()),
            };

            if let Err(e) = unsafe { control.Stop() } {
                warn!("IMediaControl::Stop failed: {e}");
            }
            Ok(outcome)
        }

        fn teardown(&mut self) {
            if let Some(graph) = &self.graph {
                if let Ok(control) = graph.cast::<IMediaControl>() {
                    unsafe {
                        let _ = control.Stop();
                    }
                }
            }
            if self.callback_installed {
                if let Some(grabber) = &self.grabber {
                    unsafe {
                        let _ = grabber.set_callback(std::ptr::null_mut(), BUFFER_CALLBACK);
                    }
                }
                self.callback_installed = false;
            }
            self.grabber = None;
            self.sink = None;
            self.grabber_filter = None;
            self.source = None;
            self.graph = None;
        }
    }

    impl Drop for DirectShowGraph {
        fn drop(&mut self) {
            self.teardown();
        }
    }

    /// First pin of `direction` on `filter` that is not connected yet.
    unsafe fn find_unconnected_pin(filter: &IBaseFilter, direction: PinDirection) -> Result<IPin> {
        use windows::Win32::Media::DirectShow::{PINDIR_INPUT, PINDIR_OUTPUT};

        let wanted = match direction {
            PinDirection::Input => PINDIR_INPUT,
            PinDirection::Output => PINDIR_OUTPUT,
        };

        let pin_enum = filter
            .EnumPins()
            .map_err(|e| CaptureError::Connection(format!("EnumPins failed: {e}")))?;

        let mut pin_array = [None; 1];
        loop {
            if pin_enum.Next(&mut pin_array, None).is_err() {
                break;
            }
            let Some(pin) = pin_array[0].take() else {
                break;
            };

            match pin.QueryDirection() {
                Ok(dir) if dir == wanted => {}
                _ => continue,
            }

            if pin.ConnectedTo().is_err() {
                return Ok(pin);
            }
        }

        Err(CaptureError::Connection(format!(
            "no unconnected {direction:?} pin"
        )))
    }
}
