use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::pairing::PairingStatus;
use crate::registry::Device;
use crate::state::StatusSnapshot;
use crate::streaming::DeliveryOutcome;
use crate::transport::{DeviceLink, PairingHandle, PinDirection};
use crate::types::{Credentials, DeviceInfo, SlideshowConfig};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Answer to a pairing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingStart {
    /// Who shows the PIN
    pub direction: PinDirection,
    /// PIN to enter on the device, when the controller provides it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

/// Requests from handles to the engine task
pub(crate) enum Command {
    Discover(Reply<Vec<Device>>),
    Devices(Reply<Vec<Device>>),
    Connect {
        device_id: String,
        reply: Reply<()>,
    },
    Disconnect {
        device_id: String,
        reply: Reply<()>,
    },
    StartPairing {
        device_id: String,
        reply: Reply<PairingStart>,
    },
    SubmitPin {
        device_id: String,
        pin: String,
        reply: Reply<()>,
    },
    CancelPairing {
        device_id: String,
        reply: Reply<()>,
    },
    PairingStatus {
        device_id: String,
        reply: Reply<Option<PairingStatus>>,
    },
    Configure {
        config: SlideshowConfig,
        reply: Reply<()>,
    },
    RestoreLastSession(Reply<bool>),
    Start(Reply<()>),
    Stop(Reply<()>),
    Next(Reply<()>),
    Previous(Reply<()>),
    UpdateDisplayTime {
        seconds: u64,
        reply: Reply<()>,
    },
    Status(Reply<StatusSnapshot>),
    Shutdown(Reply<()>),
}

/// Where a finished configuration load reports to
pub(crate) enum ConfigReply {
    Configure(Reply<()>),
    Restore(Reply<bool>),
}

impl ConfigReply {
    pub(crate) fn send(self, result: Result<()>) {
        match self {
            Self::Configure(reply) => {
                let _ = reply.send(result);
            }
            Self::Restore(reply) => {
                let _ = reply.send(result.map(|()| true));
            }
        }
    }
}

/// Completions of I/O spawned by the engine task
pub(crate) enum Internal {
    Discovered {
        result: Result<Vec<DeviceInfo>>,
        reply: Reply<Vec<Device>>,
    },
    Connected {
        device_id: String,
        result: Result<(Arc<dyn DeviceLink>, Option<Credentials>)>,
        reply: Option<Reply<()>>,
    },
    PairingOpened {
        device_id: String,
        generation: u64,
        result: Result<Box<dyn PairingHandle>>,
        reply: Option<Reply<PairingStart>>,
    },
    PinVerified {
        device_id: String,
        generation: u64,
        handle: Box<dyn PairingHandle>,
        result: Result<(Credentials, Arc<dyn DeviceLink>)>,
        reply: Reply<()>,
    },
    ImagesLoaded {
        config: SlideshowConfig,
        result: Result<Vec<PathBuf>>,
        reply: ConfigReply,
    },
    SessionLoaded {
        config: SlideshowConfig,
        reply: Reply<bool>,
    },
    StepDone {
        sequence: u64,
        step: u64,
        outcomes: Vec<DeliveryOutcome>,
    },
    Pinged {
        device_id: String,
        result: Result<()>,
    },
}
