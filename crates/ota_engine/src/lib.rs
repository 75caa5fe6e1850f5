#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Dual bank firmware update engine.
//!
//! An update arrives as a byte stream. The image for the bank that is not
//! running is cut out of the stream while it arrives, written to flash,
//! summed, and only then made bootable by writing its signature and
//! switching the active bank. Any failure after the first erase wipes the
//! first sector of the target bank again.
//!
//! The engine never connects, resets or spawns anything. The caller provides
//! an [`embedded_io::Read`] stream, a [`flash::SharedFlash`] and a
//! [`bank::ConfigStore`], and acts on the returned [`flow::UpdateReport`].

pub mod bank;
pub mod command;
pub mod commit;
pub mod config;
pub mod cursor;
pub mod error;
pub mod flash;
pub mod flow;
pub mod http;
pub mod mem_storage;
pub mod plan;
pub mod receive;
pub mod session;
pub mod verify;
pub mod writer;


pub use bank::{BankIndex, ConfigSlot, ConfigStore, select_boot_bank};
pub use command::{UpdateCommand, UpdateReply};
pub use config::{FlowKind, OtaConfig};
pub use error::{ErrorLocation, OtaError, OtaErrorKind};
pub use flash::SharedFlash;
pub use flow::{
    LegacyFlow, PlanError, SingleImageFlow, UpdateContext, UpdateFlow, UpdateOutcome,
    UpdateReport, UpdateStage, run_configured, run_update,
};
pub use session::{UpdateDispatcher, UpdateSession};
