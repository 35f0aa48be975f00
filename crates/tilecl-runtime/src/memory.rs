use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tilecl_ir::ElemType;

/// Tensor storage shared between the workers of an execution.
///
/// Every element occupies one 32-bit slot: floating point types are stored as `f32` bits, with
/// `bf16` values rounded on store, and integer types as `i32` bits. Workers only ever write
/// disjoint elements, so relaxed atomic accesses are enough; the fork-join points of the executor
/// order them.
#[derive(Clone)]
pub struct SharedBuffer {
    elem: ElemType,
    data: Arc<[AtomicU32]>,
}

impl core::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("elem", &self.elem)
            .field("len", &self.data.len())
            .finish()
    }
}

impl SharedBuffer {
    /// Buffer of `len` zeros.
    pub fn zeros(elem: ElemType, len: usize) -> Self {
        let data = (0..len).map(|_| AtomicU32::new(0)).collect();
        Self { elem, data }
    }

    /// Buffer initialized from floating point values, converted to the element type.
    pub fn from_f32(elem: ElemType, values: &[f32]) -> Self {
        let buffer = Self::zeros(elem, values.len());
        for (index, value) in values.iter().enumerate() {
            buffer.store_f32(index, *value);
        }
        buffer
    }

    /// Buffer initialized from integer values, converted to the element type.
    pub fn from_i32(elem: ElemType, values: &[i32]) -> Self {
        let buffer = Self::zeros(elem, values.len());
        for (index, value) in values.iter().enumerate() {
            buffer.store_i32(index, *value);
        }
        buffer
    }

    /// Element type of the stored values.
    pub fn elem(&self) -> ElemType {
        self.elem
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has no element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read an element as a float.
    pub fn load_f32(&self, index: usize) -> f32 {
        let bits = self.data[index].load(Ordering::Relaxed);
        match self.elem.is_float() {
            true => f32::from_bits(bits),
            false => bits as i32 as f32,
        }
    }

    /// Read an element as an integer.
    pub fn load_i32(&self, index: usize) -> i32 {
        let bits = self.data[index].load(Ordering::Relaxed);
        match self.elem.is_float() {
            true => f32::from_bits(bits) as i32,
            false => bits as i32,
        }
    }

    /// Write an element from a float.
    pub fn store_f32(&self, index: usize, value: f32) {
        let bits = match self.elem {
            ElemType::F32 => value.to_bits(),
            ElemType::BF16 => half::bf16::from_f32(value).to_f32().to_bits(),
            _ => self.wrap_int(value as i32) as u32,
        };
        self.data[index].store(bits, Ordering::Relaxed);
    }

    /// Write an element from an integer.
    pub fn store_i32(&self, index: usize, value: i32) {
        match self.elem.is_float() {
            true => self.store_f32(index, value as f32),
            false => self.data[index].store(self.wrap_int(value) as u32, Ordering::Relaxed),
        }
    }

    /// Add `src` element-wise to `len` elements starting at `dst_offset`.
    pub fn accumulate(&self, dst_offset: usize, src: &SharedBuffer, src_offset: usize, len: usize) {
        for i in 0..len {
            match self.elem.is_float() {
                true => {
                    let value = self.load_f32(dst_offset + i) + src.load_f32(src_offset + i);
                    self.store_f32(dst_offset + i, value);
                }
                false => {
                    let value = self
                        .load_i32(dst_offset + i)
                        .wrapping_add(src.load_i32(src_offset + i));
                    self.store_i32(dst_offset + i, value);
                }
            }
        }
    }

    /// Zero `len` elements starting at `offset`.
    pub fn fill_zero(&self, offset: usize, len: usize) {
        for slot in self.data[offset..offset + len].iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Copy of the content as floats.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        (0..self.len()).map(|i| self.load_f32(i)).collect()
    }

    /// Copy of the content as integers.
    pub fn to_i32_vec(&self) -> Vec<i32> {
        (0..self.len()).map(|i| self.load_i32(i)).collect()
    }

    fn wrap_int(&self, value: i32) -> i32 {
        match self.elem {
            ElemType::U8 => value as u8 as i32,
            ElemType::S8 => value as i8 as i32,
            _ => value,
        }
    }
}

/// Buffers bound to the input and output tensors of a kernel, by tensor name.
#[derive(Default, Clone, Debug)]
pub struct Bindings {
    buffers: HashMap<String, SharedBuffer>,
}

impl Bindings {
    /// Empty bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a buffer to the tensor with the given name, replacing any previous binding.
    pub fn bind(&mut self, name: impl Into<String>, buffer: SharedBuffer) {
        self.buffers.insert(name.into(), buffer);
    }

    /// Same bindings with one more buffer.
    pub fn with(mut self, name: impl Into<String>, buffer: SharedBuffer) -> Self {
        self.bind(name, buffer);
        self
    }

    /// Buffer bound to a tensor.
    pub fn get(&self, name: &str) -> Option<&SharedBuffer> {
        self.buffers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bf16_values_are_rounded_on_store() {
        let buffer = SharedBuffer::from_f32(ElemType::BF16, &[1.0, 1.0 + 1.0 / 1024.0]);

        assert_eq!(buffer.to_f32_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn int8_values_wrap() {
        let buffer = SharedBuffer::from_i32(ElemType::S8, &[127, 128, -129]);
        let unsigned = SharedBuffer::from_i32(ElemType::U8, &[255, 256]);

        assert_eq!(buffer.to_i32_vec(), vec![127, -128, 127]);
        assert_eq!(unsigned.to_i32_vec(), vec![255, 0]);
    }

    #[test]
    fn accumulate_adds_in_place() {
        let dst = SharedBuffer::from_i32(ElemType::S32, &[1, 2, 3, 4]);
        let src = SharedBuffer::from_i32(ElemType::S32, &[10, 20, 30, 40]);
        dst.accumulate(1, &src, 2, 2);
        dst.fill_zero(0, 1);

        assert_eq!(dst.to_i32_vec(), vec![0, 32, 43, 4]);
    }
}
