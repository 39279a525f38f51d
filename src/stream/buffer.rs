//! Per-channel transfer buffers
//!
//! Blocks are backed by `u64` storage so any complex sample type can be
//! viewed over them without alignment surprises.

/// One fixed-size byte block per channel
pub struct TransferBuffers {
    blocks: Vec<Vec<u64>>,
    block_bytes: usize,
    element_size: usize,
}

impl TransferBuffers {
    /// Allocate `num_channels` zeroed blocks of `element_size * samples` bytes
    pub fn new(num_channels: usize, element_size: usize, samples: usize) -> Self {
        let block_bytes = element_size * samples;
        let words = block_bytes.div_ceil(std::mem::size_of::<u64>());
        Self {
            blocks: (0..num_channels).map(|_| vec![0u64; words]).collect(),
            block_bytes,
            element_size,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.blocks.len()
    }

    /// Block length in bytes
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Block capacity in samples
    pub fn samples(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.block_bytes / self.element_size
        }
    }

    pub fn block(&self, channel: usize) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(self.blocks[channel].as_slice())[..self.block_bytes]
    }

    pub fn block_mut(&mut self, channel: usize) -> &mut [u8] {
        let len = self.block_bytes;
        &mut bytemuck::cast_slice_mut::<u64, u8>(self.blocks[channel].as_mut_slice())[..len]
    }

    /// Views for a write call
    pub fn blocks(&self) -> Vec<&[u8]> {
        let len = self.block_bytes;
        self.blocks
            .iter()
            .map(|block| &bytemuck::cast_slice::<u64, u8>(block.as_slice())[..len])
            .collect()
    }

    /// Views for a read call
    pub fn blocks_mut(&mut self) -> Vec<&mut [u8]> {
        let len = self.block_bytes;
        self.blocks
            .iter_mut()
            .map(|block| &mut bytemuck::cast_slice_mut::<u64, u8>(block.as_mut_slice())[..len])
            .collect()
    }
}
