#![forbid(unsafe_code)]

use super::sink::CaptureSink;
use crate::domain::{CaptureRecord, ProbeEvent, Word};
use crate::error::CaptureError;
use crate::interceptor::{CallState, Invocation, InvocationListener};
use config::{ArgumentSignature, BufferPair};
use kernel::MemoryReader;
use std::any::Any;
use std::sync::Arc;

/// How arguments of a call are turned into a record.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    slots: usize,
    pair: Option<BufferPair>,
    max_bytes: usize,
}

impl CapturePlan {
    pub fn new(signature: &ArgumentSignature, max_bytes: usize) -> Result<Self, config::SignatureError> {
        Ok(Self {
            slots: signature.len(),
            pair: signature.validate()?,
            max_bytes,
        })
    }

    /// Build the record for a call with `args`. Touches no shared state.
    pub fn capture(&self, memory: &dyn MemoryReader, args: &[Word]) -> Result<CaptureRecord, CaptureError> {
        if args.len() < self.slots {
            return Err(CaptureError::MissingArgument {
                slot: args.len(),
                provided: args.len(),
            });
        }
        let arguments = args[..self.slots].to_vec();

        let Some(pair) = self.pair else {
            return Ok(CaptureRecord::new(arguments, None));
        };
        let address = arguments[pair.pointer_slot];
        let length = arguments[pair.length_slot];
        if length > self.max_bytes {
            return Err(CaptureError::LengthExceeded {
                length,
                max: self.max_bytes,
            });
        }
        let bytes = memory
            .read(address, length)
            .map_err(|source| CaptureError::OutOfBoundsRead {
                address,
                length,
                source,
            })?;
        Ok(CaptureRecord::new(arguments, Some(bytes)))
    }
}

/// Outcome of the entry half, completed on exit.
struct PendingCapture {
    arguments: Vec<Word>,
    outcome: Result<CaptureRecord, CaptureError>,
}

/// Listener turning every call into a [`ProbeEvent`].
pub(crate) struct CaptureListener {
    pub(crate) plan: CapturePlan,
    pub(crate) memory: Arc<dyn MemoryReader>,
    pub(crate) sink: Arc<dyn CaptureSink>,
}

impl InvocationListener for CaptureListener {
    fn on_enter(&self, invocation: &Invocation<'_>) -> CallState {
        let pending = PendingCapture {
            arguments: invocation.args.to_vec(),
            outcome: self.plan.capture(self.memory.as_ref(), invocation.args),
        };
        Some(Box::new(pending) as Box<dyn Any + Send>)
    }

    fn on_leave(&self, invocation: &Invocation<'_>, return_value: Word, state: CallState) {
        let pending = state
            .and_then(|state| state.downcast::<PendingCapture>().ok())
            .map(|pending| *pending)
            .unwrap_or_else(|| PendingCapture {
                arguments: invocation.args.to_vec(),
                outcome: self.plan.capture(self.memory.as_ref(), invocation.args),
            });

        let event = match pending.outcome {
            Ok(record) => ProbeEvent::Captured {
                record,
                return_value,
            },
            Err(error) => ProbeEvent::CaptureFailed {
                arguments: pending.arguments,
                error,
                return_value,
            },
        };
        self.sink.deliver(event);
    }
}
