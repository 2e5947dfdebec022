/// Device creation and the objects every Direct3D 12 resource shares

use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_err, engine_error, engine_info, engine_trace, engine_warn};
use std::cell::{Cell, RefCell};
use std::mem::ManuallyDrop;
use windows::core::{IUnknown, Interface};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::d3d12_fence::FenceTimeline;
use crate::d3d12_util::{
    blob_message, DescriptorSlots, ROOT_CONSTANT_WORDS, ROOT_PARAM_UNIFORM_BUFFER, SOURCE, SRV_HEAP_CAPACITY,
};
use fresh_render::fresh::pacing::GpuTimeline;
use fresh_render::fresh::resource::MAX_TEXTURE_UNITS;

// ============================================================================
// Helpers
// ============================================================================

/// Transition barrier over all subresources of `resource`
pub(crate) fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

pub(crate) fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Committed buffer resource of `size` bytes
pub(crate) fn create_buffer_resource(
    device: &ID3D12Device,
    heap: D3D12_HEAP_TYPE,
    size: u64,
    state: D3D12_RESOURCE_STATES,
) -> Result<ID3D12Resource> {
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        SampleDesc: windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    };
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: heap,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &desc,
                state,
                None,
                &mut resource,
            )
            .map_err(|e| {
                if e.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                    Error::OutOfMemory
                } else {
                    engine_err!(SOURCE, "CreateCommittedResource ({} bytes) failed: {}", size, e)
                }
            })?;
    }
    resource.ok_or_else(|| engine_err!(SOURCE, "CreateCommittedResource returned no resource"))
}

// ============================================================================
// Device
// ============================================================================

/// First hardware adapter that can create a feature level 11_0 device
pub(crate) fn create_device(validation: bool) -> Result<(IDXGIFactory4, ID3D12Device)> {
    unsafe {
        if validation {
            let mut debug: Option<ID3D12Debug> = None;
            match D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                Some(debug) => debug.EnableDebugLayer(),
                None => engine_warn!(SOURCE, "D3D12 debug layer unavailable"),
            }
        }

        let factory_flags = if validation {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
            .or_else(|_| CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)))
            .map_err(|e| Error::InitializationFailed(format!("CreateDXGIFactory2 failed: {}", e)))?;

        for i in 0.. {
            let adapter = match factory.EnumAdapters1(i) {
                Ok(adapter) => adapter,
                Err(_) => break,
            };
            let desc = match adapter.GetDesc1() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            let name = String::from_utf16_lossy(&desc.Description);
            let name = name.trim_end_matches('\0');
            if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE) != DXGI_ADAPTER_FLAG_NONE {
                engine_trace!(SOURCE, "Skipping software adapter {}", name);
                continue;
            }
            let mut device: Option<ID3D12Device> = None;
            if D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device).is_ok() {
                if let Some(device) = device {
                    engine_info!(SOURCE, "Direct3D 12 device: {}", name);
                    return Ok((factory, device));
                }
            }
        }
    }
    engine_error!(SOURCE, "No hardware adapter supports Direct3D 12 at feature level 11_0");
    Err(Error::InitializationFailed(
        "no Direct3D 12 capable adapter".to_string(),
    ))
}

/// Root signature shared by every pipeline
///
/// 0: root constants (b0), 1..=4: one SRV table each (t0..t3),
/// 5: root CBV (b1), plus linear-wrap static samplers s0..s3.
pub(crate) fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = (0..MAX_TEXTURE_UNITS)
        .map(|unit| D3D12_DESCRIPTOR_RANGE {
            RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
            NumDescriptors: 1,
            BaseShaderRegister: unit,
            RegisterSpace: 0,
            OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
        })
        .collect();

    let mut parameters = vec![D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Constants: D3D12_ROOT_CONSTANTS {
                ShaderRegister: 0,
                RegisterSpace: 0,
                Num32BitValues: ROOT_CONSTANT_WORDS,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }];
    for range in &ranges {
        parameters.push(D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        });
    }
    parameters.push(D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: 1,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    });
    debug_assert_eq!(parameters.len() as u32, ROOT_PARAM_UNIFORM_BUFFER + 1);

    let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = (0..MAX_TEXTURE_UNITS)
        .map(|unit| D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
            BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
            MinLOD: 0.0,
            MaxLOD: D3D12_FLOAT32_MAX,
            ShaderRegister: unit,
            RegisterSpace: 0,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        })
        .collect();

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: samplers.as_ptr(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    unsafe {
        let mut blob: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        if let Err(e) = D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut errors)) {
            let message = errors.as_ref().map(|b| blob_message(blob_bytes(b))).unwrap_or_default();
            return Err(engine_err!(SOURCE, "Root signature serialization failed: {} {}", e, message));
        }
        let blob = blob.ok_or_else(|| engine_err!(SOURCE, "Root signature serialization produced no blob"))?;
        device
            .CreateRootSignature(0, blob_bytes(&blob))
            .map_err(|e| engine_err!(SOURCE, "CreateRootSignature failed: {}", e))
    }
}

// ============================================================================
// Shared objects
// ============================================================================

/// Synchronous copy queue for texture uploads
struct UploadQueue {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    timeline: FenceTimeline,
    next_value: u64,
}

/// Object dropped by its owner while frames may still reference it
struct Retired {
    fence_value: u64,
    _object: IUnknown,
    srv_slot: Option<u32>,
}

/// Objects shared by the context and its resources
pub(crate) struct GpuShared {
    pub device: ID3D12Device,
    pub queue: ID3D12CommandQueue,
    pub list: ID3D12GraphicsCommandList,
    pub root_signature: ID3D12RootSignature,
    pub srv_heap: ID3D12DescriptorHeap,
    srv_increment: u32,
    srv_slots: RefCell<DescriptorSlots>,
    recording: Cell<bool>,
    submit_value: Cell<u64>,
    frame_slot: Cell<usize>,
    retired: RefCell<Vec<Retired>>,
    upload: RefCell<UploadQueue>,
}

impl GpuShared {
    /// `list` must be created closed
    pub(crate) fn new(
        device: ID3D12Device,
        queue: ID3D12CommandQueue,
        list: ID3D12GraphicsCommandList,
    ) -> Result<Self> {
        unsafe {
            let root_signature = create_root_signature(&device)?;
            let srv_heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                    NumDescriptors: SRV_HEAP_CAPACITY,
                    Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                    NodeMask: 0,
                })
                .map_err(|e| engine_err!(SOURCE, "SRV heap creation failed: {}", e))?;
            let srv_increment = device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV);

            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| engine_err!(SOURCE, "Upload allocator creation failed: {}", e))?;
            let upload_list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| engine_err!(SOURCE, "Upload command list creation failed: {}", e))?;
            upload_list
                .Close()
                .map_err(|e| engine_err!(SOURCE, "Upload command list close failed: {}", e))?;
            let timeline = FenceTimeline::new(&device, &queue)?;

            Ok(Self {
                device,
                queue,
                list,
                root_signature,
                srv_heap,
                srv_increment,
                srv_slots: RefCell::new(DescriptorSlots::new(SRV_HEAP_CAPACITY)),
                recording: Cell::new(false),
                submit_value: Cell::new(1),
                frame_slot: Cell::new(0),
                retired: RefCell::new(Vec::new()),
                upload: RefCell::new(UploadQueue {
                    allocator,
                    list: upload_list,
                    timeline,
                    next_value: 1,
                }),
            })
        }
    }

    pub(crate) fn set_recording(&self, recording: bool) {
        self.recording.set(recording);
    }

    /// Fence value the frame being recorded will signal
    pub(crate) fn set_submit_value(&self, value: u64) {
        self.submit_value.set(value);
    }

    /// Frame slot the CPU may write; the GPU is done with its last submission
    pub(crate) fn set_frame_slot(&self, slot: usize) {
        self.frame_slot.set(slot);
    }

    pub(crate) fn frame_slot(&self) -> usize {
        self.frame_slot.get()
    }

    /// Keep `object` (and its SRV slot) alive until the current frame completes
    pub(crate) fn retire<T: Into<IUnknown>>(&self, object: T, srv_slot: Option<u32>) {
        self.retired.borrow_mut().push(Retired {
            fence_value: self.submit_value.get(),
            _object: object.into(),
            srv_slot,
        });
    }

    /// Free retired resources whose frame the GPU has finished
    pub(crate) fn collect_retired(&self, completed_value: u64) -> usize {
        let mut retired = self.retired.borrow_mut();
        let before = retired.len();
        let mut slots = self.srv_slots.borrow_mut();
        retired.retain(|r| {
            let done = r.fence_value <= completed_value;
            if done {
                if let Some(slot) = r.srv_slot {
                    slots.release(slot);
                }
            }
            !done
        });
        before - retired.len()
    }

    /// Free every retired resource; the queue must be idle
    pub(crate) fn release_all_retired(&self) {
        self.collect_retired(u64::MAX);
    }

    /// The frame command list, or None outside begin_frame/end_frame
    pub(crate) fn current_list(&self) -> Option<&ID3D12GraphicsCommandList> {
        self.recording.get().then_some(&self.list)
    }

    /// Same as `current_list`, warning that `operation` is dropped
    pub(crate) fn recording_list(&self, operation: &str) -> Option<&ID3D12GraphicsCommandList> {
        let list = self.current_list();
        if list.is_none() {
            engine_warn!(SOURCE, "{} ignored outside a frame", operation);
        }
        list
    }

    pub(crate) fn allocate_srv(&self) -> Result<u32> {
        self.srv_slots.borrow_mut().allocate().ok_or_else(|| {
            engine_err!(SOURCE, "SRV heap full ({} textures)", SRV_HEAP_CAPACITY)
        })
    }

    pub(crate) fn srv_cpu_handle(&self, slot: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.srv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (slot * self.srv_increment) as usize,
        }
    }

    pub(crate) fn srv_gpu_handle(&self, slot: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.srv_heap.GetGPUDescriptorHandleForHeapStart() };
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + u64::from(slot * self.srv_increment),
        }
    }

    /// Record copy commands, submit them and wait for completion
    pub(crate) fn submit_upload<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ID3D12GraphicsCommandList),
    {
        let mut upload = self.upload.borrow_mut();
        unsafe {
            upload
                .allocator
                .Reset()
                .map_err(|e| engine_err!(SOURCE, "Upload allocator reset failed: {}", e))?;
            upload
                .list
                .Reset(&upload.allocator, None)
                .map_err(|e| engine_err!(SOURCE, "Upload list reset failed: {}", e))?;
            record(&upload.list);
            upload
                .list
                .Close()
                .map_err(|e| engine_err!(SOURCE, "Upload list close failed: {}", e))?;
            let list: ID3D12CommandList = upload
                .list
                .cast()
                .map_err(|e| engine_err!(SOURCE, "Upload list cast failed: {}", e))?;
            self.queue.ExecuteCommandLists(&[Some(list)]);
        }
        let value = upload.next_value;
        upload.next_value += 1;
        upload.timeline.signal(value)?;
        upload.timeline.wait_for(value)
    }
}
