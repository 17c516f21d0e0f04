//! Named 2D buffers and their host-side staging storage.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::{GpuipError, GpuipResult};

/// Identity of one pipeline graph; handles from another graph are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OwnerId(u64);

impl OwnerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Buffer element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferType {
    /// 32-bit float.
    #[default]
    Float,
}

impl BufferType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Float => 4,
        }
    }
}

/// Handle to a buffer in a [`BufferRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub(crate) owner: OwnerId,
    pub(crate) index: usize,
}

impl BufferId {
    /// Creation-order index within the owning registry.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A named 2D buffer with host staging data.
///
/// Data is interleaved: element `(x, y, c)` lives at
/// `(x + width * y) * channels + c`.
#[derive(Clone)]
pub struct Buffer {
    name: String,
    buffer_type: BufferType,
    width: u32,
    height: u32,
    channels: u32,
    data: Vec<f32>,
}

impl Buffer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Number of elements (`width * height * channels`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the staging data in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * self.buffer_type.size_bytes()
    }

    /// Host staging data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable host staging data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Staging data as raw bytes (native endianness).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Replace the staging data; the length must match exactly.
    pub fn set_data(&mut self, data: &[f32]) -> GpuipResult<()> {
        if data.len() != self.data.len() {
            return Err(GpuipError::BufferSizeMismatch {
                expected: self.data.len(),
                actual: data.len(),
            });
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// Element at pixel `(x, y)`, channel `c`.
    pub fn get(&self, x: u32, y: u32, c: u32) -> Option<f32> {
        if x >= self.width || y >= self.height || c >= self.channels {
            return None;
        }
        let idx = ((x + self.width * y) * self.channels + c) as usize;
        self.data.get(idx).copied()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Owns every buffer of one pipeline, in creation order.
#[derive(Debug, Clone)]
pub struct BufferRegistry {
    owner: OwnerId,
    width: u32,
    height: u32,
    buffers: Vec<Buffer>,
}

impl BufferRegistry {
    pub(crate) fn new(owner: OwnerId, width: u32, height: u32) -> Self {
        Self { owner, width, height, buffers: Vec::new() }
    }

    pub(crate) fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()> {
        if !self.buffers.is_empty() {
            return Err(GpuipError::State(
                "dimensions are fixed once a buffer has been created".into(),
            ));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Create a zero-initialized buffer.
    pub fn create(&mut self, name: &str, buffer_type: BufferType, channels: u32) -> GpuipResult<BufferId> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuipError::State(
                "set_dimensions() must be called before creating buffers".into(),
            ));
        }
        if !(1..=4).contains(&channels) {
            return Err(GpuipError::InvalidChannels(channels));
        }
        if self.buffers.iter().any(|b| b.name == name) {
            return Err(GpuipError::DuplicateName { kind: "buffer", name: name.to_string() });
        }

        let len = (self.width as usize) * (self.height as usize) * (channels as usize);
        trace!(name, channels, len, "buffer::create");
        self.buffers.push(Buffer {
            name: name.to_string(),
            buffer_type,
            width: self.width,
            height: self.height,
            channels,
            data: vec![0.0; len],
        });
        Ok(BufferId { owner: self.owner, index: self.buffers.len() - 1 })
    }

    /// Look a buffer up by name.
    pub fn lookup(&self, name: &str) -> GpuipResult<BufferId> {
        self.buffers
            .iter()
            .position(|b| b.name == name)
            .map(|index| BufferId { owner: self.owner, index })
            .ok_or_else(|| GpuipError::NotFound { kind: "buffer", name: name.to_string() })
    }

    /// Check that `id` was issued by this registry.
    pub fn contains(&self, id: BufferId) -> bool {
        id.owner == self.owner && id.index < self.buffers.len()
    }

    pub fn get(&self, id: BufferId) -> GpuipResult<&Buffer> {
        if !self.contains(id) {
            return Err(foreign(id));
        }
        Ok(&self.buffers[id.index])
    }

    pub fn get_mut(&mut self, id: BufferId) -> GpuipResult<&mut Buffer> {
        if !self.contains(id) {
            return Err(foreign(id));
        }
        Ok(&mut self.buffers[id.index])
    }

    /// Buffers in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        let owner = self.owner;
        self.buffers
            .iter()
            .enumerate()
            .map(move |(index, b)| (BufferId { owner, index }, b))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

fn foreign(id: BufferId) -> GpuipError {
    GpuipError::NotFound {
        kind: "buffer",
        name: format!("#{} (not owned by this processor)", id.index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(w: u32, h: u32) -> BufferRegistry {
        BufferRegistry::new(OwnerId::next(), w, h)
    }

    #[test]
    fn test_create_zeroed() {
        let mut reg = registry(4, 3);
        let id = reg.create("rgba", BufferType::Float, 4).unwrap();
        let b = reg.get(id).unwrap();
        assert_eq!(b.len(), 4 * 3 * 4);
        assert_eq!(b.size_bytes(), 4 * 3 * 4 * 4);
        assert!(b.data().iter().all(|&v| v == 0.0));
        assert_eq!((b.width(), b.height(), b.channels()), (4, 3, 4));
    }

    #[test]
    fn test_duplicate_name() {
        let mut reg = registry(2, 2);
        reg.create("a", BufferType::Float, 1).unwrap();
        let err = reg.create("a", BufferType::Float, 3).unwrap_err();
        assert!(matches!(err, GpuipError::DuplicateName { kind: "buffer", .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let mut reg = registry(2, 2);
        let a = reg.create("a", BufferType::Float, 1).unwrap();
        let b = reg.create("b", BufferType::Float, 1).unwrap();
        assert_eq!(reg.lookup("a").unwrap(), a);
        assert_eq!(reg.lookup("b").unwrap(), b);
        assert!(matches!(reg.lookup("c"), Err(GpuipError::NotFound { .. })));
    }

    #[test]
    fn test_requires_dimensions() {
        let mut reg = registry(0, 0);
        assert!(matches!(reg.create("a", BufferType::Float, 1), Err(GpuipError::State(_))));
        reg.set_dimensions(8, 8).unwrap();
        reg.create("a", BufferType::Float, 1).unwrap();
        assert!(matches!(reg.set_dimensions(16, 16), Err(GpuipError::State(_))));
    }

    #[test]
    fn test_invalid_channels() {
        let mut reg = registry(2, 2);
        assert_eq!(reg.create("a", BufferType::Float, 0), Err(GpuipError::InvalidChannels(0)));
        assert_eq!(reg.create("a", BufferType::Float, 5), Err(GpuipError::InvalidChannels(5)));
    }

    #[test]
    fn test_foreign_id_rejected() {
        let mut a = registry(2, 2);
        let mut b = registry(2, 2);
        let id = a.create("x", BufferType::Float, 1).unwrap();
        b.create("x", BufferType::Float, 1).unwrap();
        assert!(!b.contains(id));
        assert!(matches!(b.get(id), Err(GpuipError::NotFound { .. })));
    }

    #[test]
    fn test_interleaved_indexing() {
        let mut reg = registry(3, 2);
        let id = reg.create("rg", BufferType::Float, 2).unwrap();
        let buf = reg.get_mut(id).unwrap();
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        buf.set_data(&data).unwrap();
        // pixel (1, 1) -> idx 4 -> elements 8, 9
        assert_eq!(buf.get(1, 1, 0), Some(8.0));
        assert_eq!(buf.get(1, 1, 1), Some(9.0));
        assert_eq!(buf.get(3, 0, 0), None);
        assert!(matches!(buf.set_data(&[0.0; 3]), Err(GpuipError::BufferSizeMismatch { .. })));
    }

    #[test]
    fn test_as_bytes_native_layout() {
        let mut reg = registry(2, 1);
        let id = reg.create("a", BufferType::Float, 1).unwrap();
        let buf = reg.get_mut(id).unwrap();
        buf.set_data(&[1.0, -0.5]).unwrap();
        let bytes = buf.as_bytes();
        assert_eq!(bytes.len(), buf.size_bytes());
        assert_eq!(&bytes[..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &(-0.5f32).to_ne_bytes());
    }
}
