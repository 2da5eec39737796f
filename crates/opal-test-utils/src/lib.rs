//! Test utilities for the opal rendering stack.
//!
//! The main components are:
//!
//! - [`RenderDevice`] - Object-safe trait abstracting the GPU operations the
//!   quad engine and texture targets need (texture lifecycle, pixel upload
//!   and readback, render passes, binds and draws).
//! - `MockDevice` - Recording implementation for testing (requires the `mock`
//!   feature). Every call is logged as a [`DeviceCall`] so tests can assert
//!   on bind/draw/pass counts, and mock textures keep a CPU pixel store so
//!   grab/restore round-trips are observable.
//! - [`GpuTexture`] - Opaque wrapper that is either a real `wgpu::Texture`
//!   (plus its cached view) or a mock.
//!
//! # Design
//!
//! All wrapper types are owned and internally reference counted, so no
//! lifetime parameters propagate through the renderer. The mock uses
//! `parking_lot::Mutex` for interior mutability, which keeps `RenderDevice`
//! object-safe and `Send + Sync`.

pub mod device;
pub mod gpu_types;
#[cfg(feature = "mock")]
pub mod mock_device;

pub use device::*;
pub use gpu_types::*;
#[cfg(feature = "mock")]
pub use mock_device::*;
