use serde::{Deserialize, Serialize};

use crate::handle::ObjectHandle;
use crate::opcode::Opcode;

/// One server → client record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum ServerEvent {
    /// The backend's device-wide error callback fired.
    DeviceError {
        device: ObjectHandle,
        message: String,
    },
    /// Creating `object` failed backend validation; the object is poisoned.
    ObjectError {
        device: ObjectHandle,
        object: ObjectHandle,
        message: String,
    },
    /// Value result of `SwapChainGetNextTexture`.
    NextTexture {
        swap_chain: ObjectHandle,
        texture: ObjectHandle,
        backbuffer_index: u32,
    },
    /// The server hit a protocol violation and stopped decoding.
    SessionTerminated {
        reason: String,
    },
}

impl ServerEvent {
    pub fn opcode(&self) -> Opcode {
        match self {
            ServerEvent::DeviceError { .. } => Opcode::DeviceError,
            ServerEvent::ObjectError { .. } => Opcode::ObjectError,
            ServerEvent::NextTexture { .. } => Opcode::NextTexture,
            ServerEvent::SessionTerminated { .. } => Opcode::SessionTerminated,
        }
    }
}
