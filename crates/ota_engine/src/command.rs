use heapless::String;
use postcard::{from_bytes_cobs, to_slice_cobs};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::bank::{BankIndex, ConfigStore, select_boot_bank};
use crate::session::{UpdateDispatcher, UpdateSession};

pub const HOST_MAX: usize = 63;
pub const RESOURCE_MAX: usize = 63;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum UpdateCommand {
    /// Pull from a plain TCP server.
    StartLocal { ip: [u8; 4], port: u16 },
    /// `GET resource` from `host:port`.
    StartHttp {
        host: String<HOST_MAX>,
        port: u16,
        resource: String<RESOURCE_MAX>,
    },
    SelectBootBank { bank: BankIndex },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    AlreadyRunning,
    InvalidRequest,
    StorageFault,
}

/// `Accepted` only says an attempt was started. Its result shows up as a
/// reboot or in the log.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReply {
    Accepted,
    Rejected(RejectReason),
    BootBankSelected(BankIndex),
}

/// Where an accepted attempt reads its image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    Local {
        ip: [u8; 4],
        port: u16,
    },
    Http {
        host: String<HOST_MAX>,
        port: u16,
        resource: String<RESOURCE_MAX>,
    },
}

/// An admitted attempt. The caller hands it to the update task, which keeps
/// `session` alive until the attempt ends.
#[derive(Debug)]
pub struct AcceptedUpdate<'d> {
    pub session: UpdateSession<'d>,
    pub source: UpdateSource,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("reply could not be encoded")]
    Encode(#[from] postcard::Error),
}

impl UpdateDispatcher {
    /// Decodes one COBS framed [`UpdateCommand`] from `in_buff`, writes the
    /// framed [`UpdateReply`] to `out_buff` and returns its length.
    pub fn handle_command<'d, C: ConfigStore>(
        &'d self,
        in_buff: &mut [u8],
        out_buff: &mut [u8],
        store: &mut C,
    ) -> Result<(usize, Option<AcceptedUpdate<'d>>), CommandError> {
        let (reply, accepted) = match from_bytes_cobs::<UpdateCommand>(in_buff) {
            Ok(command) => self.dispatch(command, store),
            Err(err) => {
                log::warn!("undecodable update command: {}", err);
                (UpdateReply::Rejected(RejectReason::InvalidRequest), None)
            }
        };
        let used = to_slice_cobs(&reply, out_buff)?.len();
        Ok((used, accepted))
    }

    pub fn dispatch<'d, C: ConfigStore>(
        &'d self,
        command: UpdateCommand,
        store: &mut C,
    ) -> (UpdateReply, Option<AcceptedUpdate<'d>>) {
        let source = match command {
            UpdateCommand::SelectBootBank { bank } => {
                return (self.select_bank(bank, store), None);
            }
            UpdateCommand::StartLocal { ip, port } => UpdateSource::Local { ip, port },
            UpdateCommand::StartHttp {
                host,
                port,
                resource,
            } => UpdateSource::Http {
                host,
                port,
                resource,
            },
        };

        if !source.is_valid() {
            log::warn!("rejecting update from {:?}", source);
            return (UpdateReply::Rejected(RejectReason::InvalidRequest), None);
        }

        match self.try_begin() {
            Ok(session) => {
                log::info!("update accepted from {:?}", source);
                (
                    UpdateReply::Accepted,
                    Some(AcceptedUpdate { session, source }),
                )
            }
            Err(_) => (UpdateReply::Rejected(RejectReason::AlreadyRunning), None),
        }
    }

    /// Refused while an update runs, since that attempt owns the slot.
    fn select_bank<C: ConfigStore>(&self, bank: BankIndex, store: &mut C) -> UpdateReply {
        let Ok(_session) = self.try_begin() else {
            return UpdateReply::Rejected(RejectReason::AlreadyRunning);
        };
        match select_boot_bank(store, bank) {
            Ok(()) => UpdateReply::BootBankSelected(bank),
            Err(err) => {
                log::warn!("boot bank selection failed: {}", err);
                UpdateReply::Rejected(RejectReason::StorageFault)
            }
        }
    }
}

impl UpdateSource {
    fn is_valid(&self) -> bool {
        match self {
            UpdateSource::Local { port, .. } => *port != 0,
            UpdateSource::Http {
                host,
                port,
                resource,
            } => *port != 0 && !host.is_empty() && !resource.is_empty(),
        }
    }
}
