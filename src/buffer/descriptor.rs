//! Chainable views over contiguous buffers
//!
//! A [`BufferDescriptor`] names a window (`offset`, `length`) of some backing
//! storage and may link to further descriptors when a unit spans several
//! buffers. The backing storage is any slice-like owner or borrow: a
//! `Ref<[u8]>` for a payload that still lives in a network buffer, or a
//! `Box<[i16]>` for a pooled sample buffer.

use std::ops::{Deref, DerefMut};

/// Pooled decoded audio samples (interleaved PCM16)
pub type SampleBufferDescriptor = BufferDescriptor<Box<[i16]>>;

/// View of `length` elements of `data` starting at `offset`
#[derive(Debug, Clone)]
pub struct BufferDescriptor<S> {
    data: S,
    offset: usize,
    length: usize,
    next: Option<Box<BufferDescriptor<S>>>,
}

impl<S, T> BufferDescriptor<S>
where
    S: Deref<Target = [T]>,
{
    /// Create a descriptor; `offset + length` must fit inside `data`
    pub fn new(data: S, offset: usize, length: usize) -> Self {
        assert!(
            offset + length <= data.len(),
            "descriptor window {}+{} exceeds backing size {}",
            offset,
            length,
            data.len()
        );
        Self {
            data,
            offset,
            length,
            next: None,
        }
    }

    /// Descriptor covering all of `data`
    pub fn whole(data: S) -> Self {
        let length = data.len();
        Self::new(data, 0, length)
    }

    /// Reuse this descriptor for new storage, dropping any chained links
    pub fn reinitialize(&mut self, data: S, offset: usize, length: usize) {
        assert!(offset + length <= data.len());
        self.data = data;
        self.offset = offset;
        self.length = length;
        self.next = None;
    }

    /// Move the window without touching the storage
    pub fn set_window(&mut self, offset: usize, length: usize) {
        assert!(offset + length <= self.data.len());
        self.offset = offset;
        self.length = length;
    }

    /// Shrink or grow the window from the current offset
    pub fn set_length(&mut self, length: usize) {
        self.set_window(self.offset, length);
    }

    /// Elements inside the window
    pub fn as_slice(&self) -> &[T] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// Size of the backing storage
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Sum of the window lengths over the whole chain
    pub fn total_length(&self) -> usize {
        self.chain().map(|desc| desc.length).sum()
    }

    /// Copy the whole chain into `out`
    pub fn copy_chain_into(&self, out: &mut Vec<T>)
    where
        T: Clone,
    {
        out.reserve(self.total_length());
        for desc in self.chain() {
            out.extend_from_slice(desc.as_slice());
        }
    }
}

impl<S, T> BufferDescriptor<S>
where
    S: DerefMut<Target = [T]>,
{
    /// Elements inside the window, writable
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let (offset, length) = (self.offset, self.length);
        &mut self.data[offset..offset + length]
    }

    /// The entire backing storage, ignoring the window
    pub fn backing_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<S> BufferDescriptor<S> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The backing storage
    pub fn data(&self) -> &S {
        &self.data
    }

    /// Give back the backing storage
    pub fn into_data(self) -> S {
        self.data
    }

    /// Next descriptor in the chain
    pub fn next(&self) -> Option<&BufferDescriptor<S>> {
        self.next.as_deref()
    }

    /// Link `desc` after the last descriptor of this chain
    pub fn append(&mut self, desc: BufferDescriptor<S>) {
        let mut tail = &mut self.next;
        while let Some(link) = tail {
            tail = &mut link.next;
        }
        *tail = Some(Box::new(desc));
    }

    /// Detach everything after this descriptor
    pub fn take_next(&mut self) -> Option<BufferDescriptor<S>> {
        self.next.take().map(|next| *next)
    }

    /// Iterate over this descriptor and every linked one
    pub fn chain(&self) -> Chain<'_, S> {
        Chain {
            current: Some(self),
        }
    }

    /// Number of descriptors in the chain
    pub fn chain_len(&self) -> usize {
        self.chain().count()
    }
}

/// Iterator over a descriptor chain
pub struct Chain<'a, S> {
    current: Option<&'a BufferDescriptor<S>>,
}

impl<'a, S> Iterator for Chain<'a, S> {
    type Item = &'a BufferDescriptor<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let desc = self.current?;
        self.current = desc.next.as_deref();
        Some(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let desc = BufferDescriptor::new(&[1u8, 2, 3, 4, 5][..], 1, 3);
        assert_eq!(desc.as_slice(), &[2, 3, 4]);
        assert_eq!(desc.capacity(), 5);
    }

    #[test]
    #[should_panic]
    fn test_window_out_of_bounds() {
        let _ = BufferDescriptor::new(&[0u8; 4][..], 2, 3);
    }

    #[test]
    fn test_chain_spans_buffers() {
        let first = [1u8, 2, 3];
        let second = [9u8, 4, 5];
        let third = [6u8];

        let mut desc = BufferDescriptor::whole(&first[..]);
        desc.append(BufferDescriptor::new(&second[..], 1, 2));
        desc.append(BufferDescriptor::whole(&third[..]));

        assert_eq!(desc.chain_len(), 3);
        assert_eq!(desc.total_length(), 6);

        let mut joined = Vec::new();
        desc.copy_chain_into(&mut joined);
        assert_eq!(joined, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reinitialize_clears_chain() {
        let mut desc: SampleBufferDescriptor = BufferDescriptor::whole(vec![0i16; 4].into_boxed_slice());
        desc.append(BufferDescriptor::whole(vec![1i16; 2].into_boxed_slice()));
        desc.reinitialize(vec![7i16; 8].into_boxed_slice(), 2, 2);

        assert!(desc.next().is_none());
        assert_eq!(desc.as_slice(), &[7, 7]);
    }

    #[test]
    fn test_write_through_backing() {
        let mut desc: SampleBufferDescriptor = BufferDescriptor::whole(vec![0i16; 6].into_boxed_slice());
        desc.backing_mut()[..3].copy_from_slice(&[10, 20, 30]);
        desc.set_length(3);
        assert_eq!(desc.as_slice(), &[10, 20, 30]);
        desc.as_mut_slice()[0] = -1;
        assert_eq!(desc.as_slice(), &[-1, 20, 30]);
    }
}
