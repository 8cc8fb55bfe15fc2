use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use aes::{Aes128, Aes256};

use crate::zrtp_core::zrtp_core_error::ZrtpCoreError;

const BLOCK: usize = 16;

/// AES in 128-bit CFB mode, used for the encrypted part of Confirm and
/// keyed with the ZRTP key of the sending role.
pub fn cfb_encrypt(key: &[u8], iv: &[u8; BLOCK], data: &mut [u8]) -> Result<(), ZrtpCoreError> {
    cfb(key, iv, data, true)
}

pub fn cfb_decrypt(key: &[u8], iv: &[u8; BLOCK], data: &mut [u8]) -> Result<(), ZrtpCoreError> {
    cfb(key, iv, data, false)
}

enum BlockCipher {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, ZrtpCoreError> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(|c| BlockCipher::Aes128(Box::new(c)))
                .map_err(|_| ZrtpCoreError::InvalidKeyLength(key.len())),
            32 => Aes256::new_from_slice(key)
                .map(|c| BlockCipher::Aes256(Box::new(c)))
                .map_err(|_| ZrtpCoreError::InvalidKeyLength(key.len())),
            n => Err(ZrtpCoreError::InvalidKeyLength(n)),
        }
    }

    fn encrypt(&self, block: &mut [u8; BLOCK]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Aes128(c) => c.encrypt_block(b),
            BlockCipher::Aes256(c) => c.encrypt_block(b),
        }
    }
}

fn cfb(key: &[u8], iv: &[u8; BLOCK], data: &mut [u8], encrypt: bool) -> Result<(), ZrtpCoreError> {
    let cipher = BlockCipher::new(key)?;
    let mut feedback = *iv;
    for chunk in data.chunks_mut(BLOCK) {
        let mut keystream = feedback;
        cipher.encrypt(&mut keystream);
        let mut next = [0u8; BLOCK];
        for (i, byte) in chunk.iter_mut().enumerate() {
            let input = *byte;
            *byte ^= keystream[i];
            next[i] = if encrypt { *byte } else { input };
        }
        feedback = next;
    }
    Ok(())
}
