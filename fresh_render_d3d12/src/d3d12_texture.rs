/// Texture - Direct3D 12 implementation of RenderTexture trait
///
/// Pixels go through an UPLOAD-heap staging buffer into a DEFAULT-heap
/// texture on the shared upload list. The SRV lives in one slot of the
/// shader-visible heap, bound as a root descriptor table per unit.

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{validate_texture_request, validate_texture_unit, NativeHandle, RenderTexture};
use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_err, engine_warn};
use std::mem::ManuallyDrop;
use std::rc::Rc;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC};

use crate::d3d12_device::{create_buffer_resource, transition_barrier, GpuShared};
use crate::d3d12_util::{texture_upload_pitch, DEFAULT_SHADER_4_COMPONENT_MAPPING, ROOT_PARAM_FIRST_TEXTURE, SOURCE};

pub struct Texture {
    shared: Rc<GpuShared>,
    pub(crate) resource: ID3D12Resource,
    srv_slot: u32,
    width: u32,
    height: u32,
    _tracked: TrackedResource,
}

fn create_texture_resource(device: &ID3D12Device, width: u32, height: u32) -> Result<ID3D12Resource> {
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Width: u64::from(width),
        Height: height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: D3D12_RESOURCE_FLAG_NONE,
        ..Default::default()
    };
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_DEFAULT,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_COPY_DEST,
                None,
                &mut resource,
            )
            .map_err(|e| {
                if e.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                    Error::OutOfMemory
                } else {
                    engine_err!(SOURCE, "Texture resource ({}x{}) creation failed: {}", width, height, e)
                }
            })?;
    }
    resource.ok_or_else(|| engine_err!(SOURCE, "CreateCommittedResource returned no texture"))
}

impl Texture {
    pub(crate) fn new(
        shared: Rc<GpuShared>,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_texture_request(width, height, data)?;
        let resource = create_texture_resource(&shared.device, width, height)?;

        // Allocate-only textures still get transitioned to a readable state
        let pitch = texture_upload_pitch(width);
        let staging = match data {
            Some(pixels) => {
                let staging = create_buffer_resource(
                    &shared.device,
                    D3D12_HEAP_TYPE_UPLOAD,
                    u64::from(pitch) * u64::from(height),
                    D3D12_RESOURCE_STATE_GENERIC_READ,
                )?;
                unsafe {
                    let mut mapped = std::ptr::null_mut();
                    staging
                        .Map(0, None, Some(&mut mapped))
                        .map_err(|e| engine_err!(SOURCE, "Map of texture staging buffer failed: {}", e))?;
                    let mapped = mapped as *mut u8;
                    let row = width as usize * 4;
                    for y in 0..height as usize {
                        std::ptr::copy_nonoverlapping(
                            pixels.as_ptr().add(y * row),
                            mapped.add(y * pitch as usize),
                            row,
                        );
                    }
                    staging.Unmap(0, None);
                }
                Some(staging)
            }
            None => None,
        };

        shared.submit_upload(|list| unsafe {
            if let Some(staging) = &staging {
                let dst = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(resource.clone())),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
                };
                let src = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(staging.clone())),
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                            Offset: 0,
                            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                                Width: width,
                                Height: height,
                                Depth: 1,
                                RowPitch: pitch,
                            },
                        },
                    },
                };
                list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
                // The copy locations hold an AddRef each
                drop(ManuallyDrop::into_inner(dst.pResource));
                drop(ManuallyDrop::into_inner(src.pResource));
            }
            let barrier = transition_barrier(
                &resource,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            );
            list.ResourceBarrier(&[barrier]);
        })?;

        let srv_slot = shared.allocate_srv()?;
        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        unsafe {
            shared
                .device
                .CreateShaderResourceView(&resource, Some(&srv_desc as *const _), shared.srv_cpu_handle(srv_slot));
        }

        Ok(Self {
            shared,
            resource,
            srv_slot,
            width,
            height,
            _tracked: tracked,
        })
    }
}

impl RenderTexture for Texture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bind(&self, unit: u32) {
        if let Err(e) = validate_texture_unit(unit) {
            engine_warn!(SOURCE, "Texture bind ignored: {}", e);
            return;
        }
        let Some(list) = self.shared.recording_list("Texture bind") else {
            return;
        };
        unsafe {
            list.SetDescriptorHeaps(&[Some(self.shared.srv_heap.clone())]);
            list.SetGraphicsRootDescriptorTable(ROOT_PARAM_FIRST_TEXTURE + unit, self.shared.srv_gpu_handle(self.srv_slot));
        }
    }

    fn unbind(&self) {
        // Descriptor tables are command-list state, replaced by the next bind
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::ComPtr(self.resource.as_raw())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.shared.retire(self.resource.clone(), Some(self.srv_slot));
    }
}
