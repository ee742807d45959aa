#![forbid(unsafe_code)]

use crate::error::SignatureError;
use serde::{Deserialize, Serialize};

/// Semantic kind of a single argument slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotKind {
    /// A pointer-sized value with no further meaning (handles, pools, ...).
    Opaque,
    /// An integer value.
    Scalar,
    /// A data pointer whose byte length lives in `length_slot`.
    Buffer { length_slot: usize },
}

/// Per-slot description of the target function's arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ArgumentSignature {
    slots: Vec<SlotKind>,
}

/// A validated pointer+length pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPair {
    pub pointer_slot: usize,
    pub length_slot: usize,
}

impl ArgumentSignature {
    pub fn new(slots: impl Into<Vec<SlotKind>>) -> Self {
        Self {
            slots: slots.into(),
        }
    }

    /// `CRYPTO_BUFFER_new(const uint8_t *data, size_t len, CRYPTO_BUFFER_POOL *pool)`
    pub fn crypto_buffer_new() -> Self {
        Self::new([
            SlotKind::Buffer { length_slot: 1 },
            SlotKind::Scalar,
            SlotKind::Opaque,
        ])
    }

    pub fn slots(&self) -> &[SlotKind] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check slot references and return the pointer+length pair, if any.
    pub fn validate(&self) -> Result<Option<BufferPair>, SignatureError> {
        let mut pair = None;
        for (slot, kind) in self.slots.iter().enumerate() {
            let SlotKind::Buffer { length_slot } = *kind else {
                continue;
            };
            if length_slot == slot {
                return Err(SignatureError::SelfReferentialLength { slot });
            }
            match self.slots.get(length_slot) {
                None => {
                    return Err(SignatureError::LengthSlotOutOfRange {
                        slot,
                        length_slot,
                        len: self.slots.len(),
                    });
                }
                Some(SlotKind::Buffer { .. }) => {
                    return Err(SignatureError::LengthSlotIsBuffer { slot, length_slot });
                }
                Some(_) => {}
            }
            if pair.is_some() {
                return Err(SignatureError::MultipleBuffers { slot });
            }
            pair = Some(BufferPair {
                pointer_slot: slot,
                length_slot,
            });
        }
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn crypto_buffer_signature_is_valid() {
        let pair = ArgumentSignature::crypto_buffer_new().validate().unwrap();
        assert_eq!(
            pair,
            Some(BufferPair {
                pointer_slot: 0,
                length_slot: 1
            })
        );
    }

    #[test]
    fn signature_without_buffers() {
        let sig = ArgumentSignature::new([SlotKind::Opaque, SlotKind::Scalar]);
        assert_eq!(sig.validate().unwrap(), None);
        assert_eq!(ArgumentSignature::default().validate().unwrap(), None);
    }

    #[test]
    fn rejects_bad_length_slots() {
        let sig = ArgumentSignature::new([SlotKind::Buffer { length_slot: 3 }]);
        assert_eq!(
            sig.validate(),
            Err(SignatureError::LengthSlotOutOfRange {
                slot: 0,
                length_slot: 3,
                len: 1
            })
        );

        let sig = ArgumentSignature::new([SlotKind::Scalar, SlotKind::Buffer { length_slot: 1 }]);
        assert_eq!(
            sig.validate(),
            Err(SignatureError::SelfReferentialLength { slot: 1 })
        );

        let sig = ArgumentSignature::new([
            SlotKind::Buffer { length_slot: 1 },
            SlotKind::Buffer { length_slot: 0 },
        ]);
        assert_eq!(
            sig.validate(),
            Err(SignatureError::LengthSlotIsBuffer {
                slot: 0,
                length_slot: 1
            })
        );
    }

    #[test]
    fn rejects_second_pair() {
        let sig = ArgumentSignature::new([
            SlotKind::Buffer { length_slot: 1 },
            SlotKind::Scalar,
            SlotKind::Buffer { length_slot: 3 },
            SlotKind::Scalar,
        ]);
        assert_eq!(
            sig.validate(),
            Err(SignatureError::MultipleBuffers { slot: 2 })
        );
    }
}
