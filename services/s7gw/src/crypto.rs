//! DES-ECB encryption for the panel user file
//!
//! The touch panel expects the user file as DES ciphertext in ECB mode
//! with a fixed key; the final short block is zero-filled.

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::Des;

/// DES block size in bytes
pub const BLOCK_SIZE: usize = 8;

/// Key shared with the panel firmware, zero-filled to 8 bytes
pub const PANEL_KEY: [u8; 8] = *b"123\0\0\0\0\0";

/// Block encryptor for the user-file transfer
pub struct Encryptor {
    cipher: Des,
}

impl Encryptor {
    /// Encryptor with an explicit key
    pub fn new(key: [u8; 8]) -> Self {
        Self {
            cipher: Des::new(GenericArray::from_slice(&key)),
        }
    }

    /// Encryptor with the panel key
    pub fn panel() -> Self {
        Self::new(PANEL_KEY)
    }

    /// Encrypt one 8-byte block
    pub fn encrypt_block(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut block = GenericArray::from(block);
        self.cipher.encrypt_block(&mut block);
        block.into()
    }

    /// Decrypt one 8-byte block
    pub fn decrypt_block(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut block = GenericArray::from(block);
        self.cipher.decrypt_block(&mut block);
        block.into()
    }

    /// Split into blocks, zero-fill the tail and encrypt each block
    pub fn encrypt_blocks(&self, data: &[u8]) -> Vec<[u8; BLOCK_SIZE]> {
        data.chunks(BLOCK_SIZE)
            .map(|chunk| {
                let mut block = [0u8; BLOCK_SIZE];
                block[..chunk.len()].copy_from_slice(chunk);
                self.encrypt_block(block)
            })
            .collect()
    }
}

/// Render ciphertext the way the panel reads it: one decimal byte per line
pub fn render_decimal_lines(blocks: &[[u8; BLOCK_SIZE]]) -> String {
    let mut out = String::with_capacity(blocks.len() * BLOCK_SIZE * 4);
    for byte in blocks.iter().flatten() {
        out.push_str(&byte.to_string());
        out.push('\n');
    }
    out
}
